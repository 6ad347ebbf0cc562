use std::path::Path;

use clap::{crate_version, Arg, ArgAction, Command};

use hprof_delve::errors::HprofDelveError;
use hprof_delve::errors::HprofDelveError::{InputFileNotFound, InvalidTopPositiveInt};

pub struct CliArgs {
    pub input_file: String,
    pub top: usize,
    pub json: bool,
    pub in_memory: bool,
    pub path_target: Option<u64>,
    pub dominators: bool,
    pub patterns: Vec<String>,
}

fn command() -> Command {
    Command::new("hprof-delve")
        .version(crate_version!())
        .about("Indexed JVM heap dump hprof analyzer")
        .arg(
            Arg::new("inputFile")
                .help("binary hprof input file")
                .long("inputFile")
                .short('i')
                .required(true),
        )
        .arg(
            Arg::new("top")
                .help("the top results to display")
                .long("top")
                .short('t')
                .default_value("20"),
        )
        .arg(
            Arg::new("json")
                .help("additionally write the top retained objects to a JSON file")
                .long("json")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("inMemory")
                .help("keep all indexes in memory, write nothing next to the dump")
                .long("inMemory")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("pathToRoot")
                .help("print the shortest GC-root path for an object address (hex or decimal)")
                .long("pathToRoot")
                .short('p')
                .value_name("ADDRESS"),
        )
        .arg(
            Arg::new("dominators")
                .help("compute exact dominators over the largest retained objects")
                .long("dominators")
                .short('d')
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("pattern")
                .help("class name glob added to the dominator interesting set")
                .long("pattern")
                .value_name("GLOB")
                .action(ArgAction::Append),
        )
}

pub fn get_args() -> Result<CliArgs, HprofDelveError> {
    let matches = command().get_matches();

    let input_file = matches
        .get_one::<String>("inputFile")
        .expect("required argument")
        .trim()
        .to_string();
    if !Path::new(&input_file).is_file() {
        return Err(InputFileNotFound { name: input_file });
    }

    let top: usize = matches
        .get_one::<String>("top")
        .expect("defaulted argument")
        .parse()
        .map_err(|_| InvalidTopPositiveInt)?;
    if top == 0 {
        return Err(InvalidTopPositiveInt);
    }

    let path_target = matches
        .get_one::<String>("pathToRoot")
        .map(|raw| parse_address(raw))
        .transpose()?;

    let patterns = matches
        .get_many::<String>("pattern")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    Ok(CliArgs {
        input_file,
        top,
        json: matches.get_flag("json"),
        in_memory: matches.get_flag("inMemory"),
        path_target,
        dominators: matches.get_flag("dominators"),
        patterns,
    })
}

pub fn parse_address(raw: &str) -> Result<u64, HprofDelveError> {
    let trimmed = raw.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    };
    parsed.map_err(|_| HprofDelveError::InvalidAddress {
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod args_tests {
    use super::{command, parse_address};

    #[test]
    fn verify_command() {
        command().debug_assert();
    }

    #[test]
    fn addresses_parse_hex_and_decimal() {
        assert_eq!(parse_address("0x1f").unwrap(), 31);
        assert_eq!(parse_address("42").unwrap(), 42);
        assert!(parse_address("zz").is_err());
    }
}
