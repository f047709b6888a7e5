use jarcloak::config::Config;
use jarcloak::obfuscator::Obfuscator;

use clap::{crate_version, value_parser, Arg, Command};
use std::path::PathBuf;

fn main() -> Result<(), jarcloak::Error> {
    let matches = Command::new("jarcloak")
        .version(crate_version!())
        .about("Obfuscate the classes of a JVM archive")
        .arg(
            Arg::new("CONFIG")
                .help("JSON configuration file")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .index(1),
        )
        .arg(
            Arg::new("input")
                .long("input")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Input archive (overrides `inputPath`)"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Output archive (overrides `outputPath`)"),
        )
        .arg(
            Arg::new("mapping")
                .long("mapping")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Where to write the renaming report (overrides `mappingPath`)"),
        )
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("CONFIG") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(input) = matches.get_one::<PathBuf>("input") {
        config.input_path = Some(input.clone());
    }
    if let Some(output) = matches.get_one::<PathBuf>("output") {
        config.output_path = Some(output.clone());
    }
    if let Some(mapping) = matches.get_one::<PathBuf>("mapping") {
        config.set_mapping_path(mapping);
    }

    // `RUST_LOG` wins over the configured level
    let env = env_logger::Env::default().default_filter_or(config.log_level.as_str());
    env_logger::Builder::from_env(env).init();

    let obfuscator = Obfuscator::new(config);
    let artifacts = obfuscator.run()?;
    if let Some(assignment) = &artifacts.rename_assignment {
        let (classes, fields, methods) = assignment.counts();
        log::info!(
            "Done: renamed {} classes, {} fields, and {} methods",
            classes,
            fields,
            methods
        );
    } else {
        log::info!("Done");
    }
    Ok(())
}
