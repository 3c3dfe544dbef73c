use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "spanzip")]
#[command(version)]
#[command(
    about = "List and extract ZIP archives, including split and AES-encrypted ones",
    long_about = None
)]
#[command(after_help = "Examples:\n  \
  spanzip data1.zip -x joe          extract all files except joe from data1.zip\n  \
  spanzip -p foo.zip | more         send contents of foo.zip via pipe into more\n  \
  spanzip -l backup.zip             list a split archive (pass the final volume)\n  \
  spanzip -P secret -d out vault.zip  extract AES-encrypted entries into out/")]
pub struct Cli {
    /// ZIP file, or the final volume of a split archive
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely/show version info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Password for AES-encrypted entries
    #[arg(short = 'P', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Code page for names without the UTF-8 flag (default: cp437)
    #[arg(short = 'O', value_name = "CHARSET")]
    pub charset: Option<String>,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    pub fn password_bytes(&self) -> Option<&[u8]> {
        self.password.as_deref().map(str::as_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unzip_style_flags() {
        let cli = Cli::try_parse_from([
            "spanzip",
            "-P",
            "secret",
            "-O",
            "shift_jis",
            "-d",
            "out",
            "-qq",
            "archive.zip",
            "a.txt",
            "*.md",
        ])
        .unwrap();
        assert_eq!(cli.file, "archive.zip");
        assert_eq!(cli.files, ["a.txt", "*.md"]);
        assert_eq!(cli.password_bytes(), Some(b"secret".as_slice()));
        assert_eq!(cli.charset.as_deref(), Some("shift_jis"));
        assert_eq!(cli.extract_dir.as_deref(), Some("out"));
        assert!(cli.is_quiet());
        assert!(cli.is_very_quiet());
    }

    #[test]
    fn pipe_mode_is_quiet() {
        let cli = Cli::try_parse_from(["spanzip", "-p", "archive.zip"]).unwrap();
        assert!(cli.is_quiet());
        assert!(!cli.is_very_quiet());
        assert_eq!(cli.password_bytes(), None);
    }
}
