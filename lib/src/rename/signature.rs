//! Class name substitution inside generic signatures
//!
//! [Format](https://docs.oracle.com/javase/specs/jvms/se11/html/jvms-4.html#jvms-4.7.9.1)
//!
//! The same routine handles class, method, and field signatures: optional formal type
//! parameters, then either a parenthesized method signature or a sequence of reference types.

use std::iter::Peekable;
use std::str::Chars;

struct SignatureRemapper<'s, F> {
    source: Peekable<Chars<'s>>,
    output: String,
    map_class: F,
}

impl<'s, F: FnMut(&str) -> Option<String>> SignatureRemapper<'s, F> {
    fn copy(&mut self) -> Option<char> {
        let c = self.source.next()?;
        self.output.push(c);
        Some(c)
    }

    fn expect(&mut self, expected: char) -> Option<()> {
        (self.copy()? == expected).then_some(())
    }

    /// Read an identifier up to (not including) one of the terminators
    fn identifier(&mut self, terminators: &[char]) -> Option<String> {
        let mut identifier = String::new();
        loop {
            match self.source.peek() {
                Some(c) if terminators.contains(c) => return Some(identifier),
                Some(c) => {
                    identifier.push(*c);
                    self.source.next();
                }
                None => return None,
            }
        }
    }

    fn type_parameters(&mut self) -> Option<()> {
        self.expect('<')?;
        while self.source.peek() != Some(&'>') {
            let name = self.identifier(&[':'])?;
            self.output.push_str(&name);

            // Class bound (possibly empty), then interface bounds
            self.expect(':')?;
            if !matches!(self.source.peek(), Some(':') | Some('>')) {
                self.reference_type()?;
            }
            while self.source.peek() == Some(&':') {
                self.copy();
                self.reference_type()?;
            }
        }
        self.expect('>')
    }

    fn type_arguments(&mut self) -> Option<()> {
        self.expect('<')?;
        while self.source.peek() != Some(&'>') {
            match self.source.peek()? {
                '*' => {
                    self.copy();
                }
                '+' | '-' => {
                    self.copy();
                    self.reference_type()?;
                }
                _ => self.reference_type()?,
            }
        }
        self.expect('>')
    }

    fn class_type(&mut self) -> Option<()> {
        self.expect('L')?;
        let mut original = self.identifier(&['<', '.', ';'])?;
        let mut mapped = (self.map_class)(&original).unwrap_or_else(|| original.clone());
        self.output.push_str(&mapped);
        loop {
            match self.source.peek()? {
                '<' => self.type_arguments()?,
                '.' => {
                    self.copy();
                    let inner = self.identifier(&['<', '.', ';'])?;
                    original = format!("{}${}", original, inner);
                    let mapped_inner = match (self.map_class)(&original) {
                        Some(full) => {
                            let prefix = format!("{}$", mapped);
                            let inner = match full.strip_prefix(&prefix) {
                                Some(inner) => inner.to_owned(),
                                None => full
                                    .rsplit(|c: char| c == '$' || c == '/')
                                    .next()
                                    .unwrap_or(&full)
                                    .to_owned(),
                            };
                            mapped = full;
                            inner
                        }
                        None => {
                            mapped = format!("{}${}", mapped, inner);
                            inner
                        }
                    };
                    self.output.push_str(&mapped_inner);
                }
                ';' => return self.expect(';'),
                _ => return None,
            }
        }
    }

    fn reference_type(&mut self) -> Option<()> {
        match self.source.peek()? {
            'L' => self.class_type(),
            'T' => {
                let name = self.identifier(&[';'])?;
                self.output.push_str(&name);
                self.expect(';')
            }
            '[' => {
                self.copy();
                self.java_type()
            }
            _ => None,
        }
    }

    fn java_type(&mut self) -> Option<()> {
        match self.source.peek()? {
            'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' | 'V' => {
                self.copy();
                Some(())
            }
            _ => self.reference_type(),
        }
    }

    fn signature(&mut self) -> Option<()> {
        if self.source.peek() == Some(&'<') {
            self.type_parameters()?;
        }
        if self.source.peek() == Some(&'(') {
            self.copy();
            while self.source.peek() != Some(&')') {
                self.java_type()?;
            }
            self.expect(')')?;
            self.java_type()?;
            while self.source.peek() == Some(&'^') {
                self.copy();
                self.reference_type()?;
            }
        } else {
            while self.source.peek().is_some() {
                self.java_type()?;
            }
        }
        match self.source.peek() {
            None => Some(()),
            Some(_) => None,
        }
    }
}

/// Rewrite every class name in a signature
///
/// `map_class` returns the new name of a class, or `None` to keep it. Returns `None` if the
/// signature is malformed.
pub fn remap_signature(
    signature: &str,
    map_class: impl FnMut(&str) -> Option<String>,
) -> Option<String> {
    let mut remapper = SignatureRemapper {
        source: signature.chars().peekable(),
        output: String::with_capacity(signature.len()),
        map_class,
    };
    remapper.signature()?;
    Some(remapper.output)
}

#[cfg(test)]
mod test {
    use super::*;

    fn remap(signature: &str) -> Option<String> {
        remap_signature(signature, |name| match name {
            "a/Box" => Some(String::from("x/A")),
            "a/Box$Entry" => Some(String::from("x/A$b")),
            "a/Key" => Some(String::from("x/K")),
            _ => None,
        })
    }

    #[test]
    fn class_names_are_mapped() {
        assert_eq!(
            remap("Ljava/util/List<La/Box;>;").as_deref(),
            Some("Ljava/util/List<Lx/A;>;")
        );
        assert_eq!(
            remap("<T:Ljava/lang/Object;L:La/Key;>La/Box<TT;>;Ljava/lang/Comparable<-La/Key;>;")
                .as_deref(),
            Some("<T:Ljava/lang/Object;L:Lx/K;>Lx/A<TT;>;Ljava/lang/Comparable<-Lx/K;>;")
        );
        assert_eq!(
            remap("<E::La/Key;>([TE;La/Box<*>;)La/Box<+TE;>.Entry<La/Key;>;^La/Oops;").as_deref(),
            Some("<E::Lx/K;>([TE;Lx/A<*>;)Lx/A<+TE;>.b<Lx/K;>;^La/Oops;")
        );
        assert_eq!(remap("TLeft;").as_deref(), Some("TLeft;"));
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        assert_eq!(remap("La/Box"), None);
        assert_eq!(remap("(I"), None);
        assert_eq!(remap("Q"), None);
    }
}
