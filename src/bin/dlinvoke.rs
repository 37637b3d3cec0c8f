//! Call a routine of a shared library from the command line.
//!
//! ```text
//! dlinvoke libc.so "uint strlen(string s)" hello
//! dlinvoke libm "float64 pow(float64 x, float64 y)" 2 10
//! dlinvoke libc.so "int64 strtol(string s, pointer *end, int32 base)" 42xyz 10
//! ```
//!
//! Arguments are passed as strings and converted to the declared parameter
//! types. Indirect parameters take no argument: zeroed storage is passed and
//! its content printed after the call.

use clap::Parser;
use dlcall::core::marshal::read_value;
use dlcall::{
    parse_signature, Arg, ArgumentDescriptor, CallResult, Library, OpenFlags, StringEncoding,
};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dlinvoke")]
#[command(about = "Call a native library routine described by a C-like declaration", long_about = None)]
struct Cli {
    /// Library path or name (the platform extension is added when missing)
    #[arg(value_name = "LIBRARY")]
    library: String,

    /// Routine declaration, e.g. "int32 abs(int32 x)"
    #[arg(value_name = "SIGNATURE")]
    signature: String,

    /// Values for the direct parameters, in order
    #[arg(value_name = "ARGS", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Resolve symbols lazily
    #[arg(long)]
    lazy: bool,

    /// Make the library's symbols available to later loads
    #[arg(long)]
    global: bool,

    /// Pass and read strings as UTF-16
    #[arg(long)]
    wide: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> CallResult<()> {
    let mut flags = OpenFlags::EMPTY;
    if cli.lazy {
        flags = flags | OpenFlags::LAZY;
    }
    if cli.global {
        flags = flags | OpenFlags::GLOBAL;
    }

    let library = Library::open_with_flags(&cli.library, flags)?;
    if cli.wide {
        library.set_string_encoding(StringEncoding::Utf16);
    }

    let descriptor = parse_signature(&cli.signature)?;
    let name = descriptor.name.clone();
    let params = descriptor.args.clone();
    library.define(descriptor)?;

    // One word of storage per parameter covers every scalar kind.
    let mut out_slots = vec![0u64; params.len()];
    let mut args = build_args(&params, &cli.args, &mut out_slots);

    let result = library.call(&name, &mut args)?;
    if let Some(value) = result {
        println!("{value}");
    }

    let encoding = library.string_encoding();
    for (i, param) in params.iter().enumerate().filter(|(_, p)| p.indirect) {
        let slot = &out_slots[i] as *const u64 as usize;
        // SAFETY: the slot is live, 8 bytes wide, and was written by the callee
        // or is still zero.
        let value = unsafe { read_value(param.kind, slot, encoding) };
        println!("out[{i}] = {value}");
    }

    library.close()
}

/// Interleave command-line values with out-slot addresses.
///
/// Each indirect parameter takes the address of its slot in `out_slots`
/// and consumes no value. Values left over after the last parameter are
/// passed along, and run out early only if too few were given.
fn build_args<'a>(
    params: &[ArgumentDescriptor],
    values: &'a [String],
    out_slots: &mut [u64],
) -> Vec<Arg<'a>> {
    let mut positional = values.iter();
    let mut args = Vec::with_capacity(values.len() + params.len());
    for (param, slot) in params.iter().zip(out_slots.iter_mut()) {
        if param.indirect {
            args.push(Arg::Pointer(slot as *mut u64 as usize));
        } else if let Some(text) = positional.next() {
            args.push(Arg::from(text.as_str()));
        } else {
            break;
        }
    }
    args.extend(positional.map(|text| Arg::from(text.as_str())));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn text(arg: &Arg<'_>) -> Option<String> {
        match arg {
            Arg::Str(s) => Some(s.to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_out_slot_sits_between_values() {
        let descriptor =
            parse_signature("int64 strtol(string s, pointer *end, int32 base)").unwrap();
        let values = strings(&["42xyz", "10"]);
        let mut out_slots = vec![0u64; descriptor.args.len()];
        let slot = &out_slots[1] as *const u64 as usize;

        let args = build_args(&descriptor.args, &values, &mut out_slots);
        assert_eq!(args.len(), 3);
        assert_eq!(text(&args[0]).as_deref(), Some("42xyz"));
        assert!(matches!(args[1], Arg::Pointer(address) if address == slot));
        assert_eq!(text(&args[2]).as_deref(), Some("10"));
    }

    #[test]
    fn test_extra_values_are_kept() {
        let descriptor = parse_signature("uint strlen(string s)").unwrap();
        let values = strings(&["hello", "extra"]);
        let mut out_slots = vec![0u64; descriptor.args.len()];

        let args = build_args(&descriptor.args, &values, &mut out_slots);
        assert_eq!(args.len(), 2);
        assert_eq!(text(&args[1]).as_deref(), Some("extra"));
    }

    #[test]
    fn test_missing_values_stop_early() {
        let descriptor =
            parse_signature("int64 strtol(string s, pointer *end, int32 base)").unwrap();
        let values = strings(&["42"]);
        let mut out_slots = vec![0u64; descriptor.args.len()];

        let args = build_args(&descriptor.args, &values, &mut out_slots);
        assert_eq!(args.len(), 2);
        assert!(matches!(args[1], Arg::Pointer(_)));
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "dlinvoke",
            "--lazy",
            "-v",
            "libm",
            "float64 fabs(float64 x)",
            "2.5",
        ])
        .unwrap();
        assert!(cli.lazy && cli.verbose && !cli.global);
        assert_eq!(cli.args, vec!["2.5".to_string()]);
    }
}
