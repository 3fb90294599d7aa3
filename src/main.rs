use reelbox::app::AppStartupOptions;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    reelbox::app::run_with_startup(options)
}

fn parse_args(args: Vec<String>) -> anyhow::Result<AppStartupOptions> {
    let mut out = AppStartupOptions::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--data-dir" => {
                out.data_dir = Some(PathBuf::from(required_value(&args, &mut index, "--data-dir")?));
            }
            "--import" => {
                out.imports
                    .push(PathBuf::from(required_value(&args, &mut index, "--import")?));
            }
            "--remove" => {
                let name = required_value(&args, &mut index, "--remove")?;
                out.remove.push(name);
            }
            "--list" => out.list = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn required_value(args: &[String], index: &mut usize, flag: &str) -> anyhow::Result<String> {
    *index += 1;
    let Some(value) = args.get(*index) else {
        anyhow::bail!("{flag} requires a value");
    };
    if value.trim().is_empty() {
        anyhow::bail!("{flag} cannot be empty");
    }
    Ok(value.trim().to_string())
}

const HELP: &str = "\
reelbox
  --data-dir DIR    Keep tracks, settings and logs under DIR
  --import PATH     Import a file or folder, then open the player (repeatable)
  --remove NAME     Remove a stored track, then exit (repeatable)
  --list            Print stored track names, then exit
  With --list or --remove, imports run first and nothing opens.
  With no flags the player opens in the terminal.";

fn print_help() {
    println!("{HELP}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn flags_accumulate() {
        let options = parse_args(args(&[
            "--data-dir",
            "/tmp/reel",
            "--import",
            "a.mp3",
            "--import",
            "albums",
            "--list",
        ]))
        .expect("parse");
        assert_eq!(options.data_dir, Some(PathBuf::from("/tmp/reel")));
        assert_eq!(
            options.imports,
            vec![PathBuf::from("a.mp3"), PathBuf::from("albums")]
        );
        assert!(options.list);
    }

    #[test]
    fn help_matches_which_flags_exit() {
        let line_for = |flag: &str| {
            HELP.lines()
                .find(|line| line.trim_start().starts_with(flag))
                .expect("flag documented")
        };
        assert!(line_for("--import").contains("open the player"));
        assert!(!line_for("--import").contains("then exit"));

        let import_only = parse_args(args(&["--import", "a.mp3"])).expect("parse");
        assert!(!import_only.exits_after_batch());
        for flag in ["--list", "--remove"] {
            assert!(line_for(flag).contains("then exit"));
        }
        let listing = parse_args(args(&["--import", "a.mp3", "--list"])).expect("parse");
        assert!(listing.exits_after_batch());
    }

    #[test]
    fn missing_values_and_unknown_flags_fail() {
        assert!(parse_args(args(&["--remove"])).is_err());
        assert!(parse_args(args(&["--import", "  "])).is_err());
        assert!(parse_args(args(&["--volume"])).is_err());
    }
}
