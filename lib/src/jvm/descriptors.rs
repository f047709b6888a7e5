//! Field and method descriptors
//!
//! [Format](https://docs.oracle.com/javase/specs/jvms/se11/html/jvms-4.html#jvms-4.3)

use super::{BinaryName, Name};
use std::io::{Error, ErrorKind, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Conversion of descriptors to their string representation
pub trait RenderDescriptor {
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    fn render_to(&self, write_to: &mut String);
}

/// Conversion of descriptors from their string representation
pub trait ParseDescriptor: Sized {
    /// Parse a complete descriptor (trailing input is an error)
    fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let parsed = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(parsed),
            Some(c) => Err(invalid(format!("unexpected trailing '{}' in {:?}", c, source))),
        }
    }

    /// Parse a descriptor off the front of a character stream
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self>;
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidInput, message.into())
}

fn truncated(what: &str) -> Error {
    Error::new(ErrorKind::UnexpectedEof, format!("missing {}", what))
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    /// Number of local variable or stack slots a value of this type occupies
    pub fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }

    fn from_char(c: char) -> Option<BaseType> {
        Some(match c {
            'B' => BaseType::Byte,
            'C' => BaseType::Char,
            'D' => BaseType::Double,
            'F' => BaseType::Float,
            'I' => BaseType::Int,
            'J' => BaseType::Long,
            'S' => BaseType::Short,
            'Z' => BaseType::Boolean,
            _ => return None,
        })
    }

    fn to_char(self) -> char {
        match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        write_to.push(self.to_char());
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let c = source.next().ok_or_else(|| truncated("base type"))?;
        BaseType::from_char(c).ok_or_else(|| invalid(format!("'{}' is not a base type", c)))
    }
}

/// Reference type
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType<Class> {
    Object(Class),
    ObjectArray(ArrayType<Class>),
    PrimitiveArray(ArrayType<BaseType>),
}

/// Array type, by its innermost element type
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArrayType<T> {
    /// Dimensions beyond the first (`A[]` has 0, `A[][][][]` has 3)
    pub additional_dimensions: usize,

    /// Innermost element type (`A` for `A[][]`)
    pub element_type: T,
}

impl<T> ArrayType<T> {
    pub fn map<T2>(&self, map_element: impl FnOnce(&T) -> T2) -> ArrayType<T2> {
        ArrayType {
            additional_dimensions: self.additional_dimensions,
            element_type: map_element(&self.element_type),
        }
    }

    pub const fn dimensions(&self) -> usize {
        self.additional_dimensions + 1
    }
}

impl<T: RenderDescriptor> RenderDescriptor for ArrayType<T> {
    fn render_to(&self, write_to: &mut String) {
        write_to.extend(std::iter::repeat('[').take(self.dimensions()));
        self.element_type.render_to(write_to);
    }
}

impl RenderDescriptor for BinaryName {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('L');
        write_to.push_str(self.as_str());
        write_to.push(';');
    }
}

impl ParseDescriptor for BinaryName {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next_if_eq(&'L').is_none() {
            return Err(invalid("object type must start with 'L'"));
        }
        let mut class_name = String::new();
        loop {
            match source.next() {
                Some(';') => break,
                Some(c) => class_name.push(c),
                None => return Err(truncated(&format!("';' after 'L{}'", class_name))),
            }
        }
        BinaryName::from_string(class_name).map_err(invalid)
    }
}

impl<C: RenderDescriptor> RenderDescriptor for RefType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(cls) => cls.render_to(write_to),
            RefType::PrimitiveArray(arr) => arr.render_to(write_to),
            RefType::ObjectArray(arr) => arr.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for RefType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let mut dimensions = 0;
        while source.next_if_eq(&'[').is_some() {
            dimensions += 1;
        }
        if dimensions == 0 {
            return match source.peek().copied() {
                Some('L') => C::parse_from(source).map(RefType::Object),
                Some(c) => Err(invalid(format!("'{}' does not start a reference type", c))),
                None => Err(truncated("reference type")),
            };
        }
        let additional_dimensions = dimensions - 1;
        Ok(match FieldType::<C>::parse_from(source)? {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions,
                element_type,
            }),
            // unreachable: every leading '[' was consumed above
            FieldType::Ref(_) => return Err(invalid("malformed array type")),
        })
    }
}

impl<C> RefType<C> {
    pub fn map<C2>(&self, map_class: impl FnOnce(&C) -> C2) -> RefType<C2> {
        match self {
            RefType::Object(cls) => RefType::Object(map_class(cls)),
            RefType::PrimitiveArray(arr) => RefType::PrimitiveArray(*arr),
            RefType::ObjectArray(arr) => RefType::ObjectArray(arr.map(map_class)),
        }
    }

    /// Class at the bottom of this type, if there is one
    pub fn class(&self) -> Option<&C> {
        match self {
            RefType::Object(cls) => Some(cls),
            RefType::ObjectArray(arr) => Some(&arr.element_type),
            RefType::PrimitiveArray(_) => None,
        }
    }

    /// Array whose elements have the given type
    pub fn array(field_type: FieldType<C>) -> RefType<C> {
        match field_type {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::PrimitiveArray(arr)) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: arr.dimensions(),
                element_type: arr.element_type,
            }),
            FieldType::Ref(RefType::ObjectArray(arr)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: arr.dimensions(),
                element_type: arr.element_type,
            }),
        }
    }
}

impl RefType<BinaryName> {
    /// Parse the operand of a `CONSTANT_Class`, which is either a binary name or an array
    /// descriptor
    pub fn parse_class_constant(source: &str) -> Result<Self> {
        if source.starts_with('[') {
            RefType::parse(source)
        } else {
            BinaryName::from_string(source.to_owned())
                .map(RefType::Object)
                .map_err(invalid)
        }
    }

    /// Render as the operand of a `CONSTANT_Class`
    pub fn render_class_constant(&self) -> String {
        match self {
            RefType::Object(cls) => cls.as_str().to_owned(),
            other => other.render(),
        }
    }
}

/// Type of a field, local variable, or method parameter
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType<Class> {
    Base(BaseType),
    Ref(RefType<Class>),
}

impl<C> FieldType<C> {
    /// Number of local variable or stack slots a value of this type occupies
    pub fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }

    pub fn map<C2>(&self, map_class: impl FnOnce(&C) -> C2) -> FieldType<C2> {
        match self {
            FieldType::Base(base) => FieldType::Base(*base),
            FieldType::Ref(ref_type) => FieldType::Ref(ref_type.map(map_class)),
        }
    }

    /// Class at the bottom of this type, if there is one (`Foo` for both `Foo` and `Foo[][]`)
    pub fn class(&self) -> Option<&C> {
        match self {
            FieldType::Ref(ref_type) => ref_type.class(),
            FieldType::Base(_) => None,
        }
    }

    pub fn array(field_type: FieldType<C>) -> FieldType<C> {
        FieldType::Ref(RefType::array(field_type))
    }

    pub const fn object(class_name: C) -> FieldType<C> {
        FieldType::Ref(RefType::Object(class_name))
    }

    pub const fn int() -> FieldType<C> {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType<C> {
        FieldType::Base(BaseType::Long)
    }

    pub const fn float() -> FieldType<C> {
        FieldType::Base(BaseType::Float)
    }

    pub const fn double() -> FieldType<C> {
        FieldType::Base(BaseType::Double)
    }

    pub const fn char() -> FieldType<C> {
        FieldType::Base(BaseType::Char)
    }

    pub const fn short() -> FieldType<C> {
        FieldType::Base(BaseType::Short)
    }

    pub const fn byte() -> FieldType<C> {
        FieldType::Base(BaseType::Byte)
    }

    pub const fn boolean() -> FieldType<C> {
        FieldType::Base(BaseType::Boolean)
    }
}

impl<C: RenderDescriptor> RenderDescriptor for FieldType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(ref_type) => ref_type.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for FieldType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(_) => BaseType::parse_from(source).map(FieldType::Base),
            None => Err(truncated("field type")),
        }
    }
}

/// Parameter and return types of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor<Class> {
    pub parameters: Vec<FieldType<Class>>,

    /// `None` for `void`
    pub return_type: Option<FieldType<Class>>,
}

impl<C> MethodDescriptor<C> {
    /// Local variable slots taken by the parameters (plus `this`, if there is one)
    ///
    /// This is not the number of parameters: `long` and `double` take two slots each.
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this = usize::from(has_this_param);
        this + self.parameters.iter().map(FieldType::width).sum::<usize>()
    }

    pub fn map<C2>(&self, mut map_class: impl FnMut(&C) -> C2) -> MethodDescriptor<C2> {
        MethodDescriptor {
            parameters: self
                .parameters
                .iter()
                .map(|parameter| parameter.map(&mut map_class))
                .collect(),
            return_type: self
                .return_type
                .as_ref()
                .map(|return_type| return_type.map(&mut map_class)),
        }
    }
}

impl<C: RenderDescriptor> RenderDescriptor for MethodDescriptor<C> {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(return_type) => return_type.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for MethodDescriptor<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next_if_eq(&'(').is_none() {
            return Err(invalid("method descriptor must start with '('"));
        }
        let mut parameters = vec![];
        while source.next_if_eq(&')').is_none() {
            if source.peek().is_none() {
                return Err(truncated("')' after parameters"));
            }
            parameters.push(FieldType::parse_from(source)?);
        }
        let return_type = match source.next_if_eq(&'V') {
            Some(_) => None,
            None => Some(FieldType::parse_from(source)?),
        };
        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fmt::Debug;

    fn round_trip<T: RenderDescriptor + ParseDescriptor + Debug + Eq>(rendered: &str, parsed: T) {
        assert_eq!(rendered, parsed.render());
        assert_eq!(T::parse(rendered).unwrap(), parsed);
    }

    type FT = FieldType<BinaryName>;

    const INT: FT = FieldType::int();
    const DOUBLE: FT = FieldType::double();
    const OBJECT: FT = FieldType::object(BinaryName::OBJECT);
    const STRING: FT = FieldType::object(BinaryName::STRING);

    #[test]
    fn field_types() {
        round_trip("Z", FT::boolean());
        round_trip("J", FT::long());
        round_trip("Ljava/lang/Object;", OBJECT);
        round_trip(
            "[[[D",
            FieldType::array(FieldType::array(FieldType::array(DOUBLE))),
        );
        round_trip("[Ljava/lang/String;", FieldType::array(STRING));
    }

    #[test]
    fn malformed_descriptors() {
        for bad in ["", "V", "Q", "Ljava/lang/Object", "[", "I;", "L;"] {
            assert!(FT::parse(bad).is_err(), "{:?} parsed", bad);
        }
        for bad in ["", "I", "(I", "(I)", "(V)V", "()VV"] {
            assert!(MethodDescriptor::<BinaryName>::parse(bad).is_err(), "{:?} parsed", bad);
        }
    }

    #[test]
    fn class_constants() {
        let object = RefType::parse_class_constant("java/lang/Object").unwrap();
        assert_eq!(object, RefType::Object(BinaryName::OBJECT));
        assert_eq!(object.render_class_constant(), "java/lang/Object");

        let array = RefType::parse_class_constant("[[Ljava/lang/String;").unwrap();
        assert_eq!(array.class(), Some(&BinaryName::STRING));
        assert_eq!(array.render_class_constant(), "[[Ljava/lang/String;");
    }

    #[test]
    fn remap_descriptor() {
        let descriptor =
            MethodDescriptor::<BinaryName>::parse("(La/Foo;[La/Foo;J)La/Bar;").unwrap();
        let renamed = descriptor.map(|cls| {
            BinaryName::from_string(cls.as_str().replace("a/", "b/")).unwrap()
        });
        assert_eq!(renamed.render(), "(Lb/Foo;[Lb/Foo;J)Lb/Bar;");
        assert_eq!(descriptor.parameter_length(true), 5);
        assert_eq!(descriptor.parameter_length(false), 4);
    }

    #[test]
    fn method_descriptors() {
        round_trip(
            "(IDLjava/lang/String;)Ljava/lang/Object;",
            MethodDescriptor {
                parameters: vec![INT, DOUBLE, STRING],
                return_type: Some(OBJECT),
            },
        );
        round_trip(
            "()V",
            MethodDescriptor {
                parameters: Vec::<FT>::new(),
                return_type: None,
            },
        );
    }
}
