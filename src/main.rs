//! Main entry point for the spanzip CLI application.
//!
//! This binary lists and extracts ZIP archives, including split volume sets
//! and entries encrypted with WinZip AES.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::LevelFilter;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use spanzip::{ArchiveOptions, Cli, DirectoryRecord, TextEncoding, ZipExtractor};

/// Application entry point.
///
/// Parses command-line arguments, sets up logging and opens the archive.
fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.is_very_quiet() {
        LevelFilter::Error
    } else if cli.is_quiet() {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();

    let encoding = match cli.charset.as_deref() {
        Some(label) => TextEncoding::for_label(label)
            .ok_or_else(|| anyhow!("unknown character set: {label}"))?,
        None => TextEncoding::default(),
    };
    let options = ArchiveOptions {
        encoding,
        ..Default::default()
    };

    let extractor = ZipExtractor::open(&cli.file, options)
        .with_context(|| format!("cannot open archive {}", cli.file))?;
    process_zip(&extractor, &cli)
}

/// Process a ZIP archive based on CLI options.
///
/// This function handles both listing and extraction modes:
/// - List mode (`-l` or `-v`): Display archive contents
/// - Extract mode: Extract files matching the specified filters
///
/// # Arguments
///
/// * `extractor` - The opened archive
/// * `cli` - Parsed command-line arguments
///
/// # Returns
///
/// Returns `Ok(())` on success, or an error if processing fails.
fn process_zip(extractor: &ZipExtractor, cli: &Cli) -> Result<()> {
    // List mode: display archive contents and exit
    if cli.list || cli.verbose {
        list_files(extractor, cli.verbose);
        return Ok(());
    }

    let files_to_extract: Vec<_> = extractor
        .entries()
        .iter()
        .filter(|e| is_selected(e, cli))
        .collect();

    if !cli.is_quiet() {
        println!("Archive:  {}", cli.file);
        if extractor.volume_count() > 1 {
            println!("  {} volumes", extractor.volume_count());
        }
    }

    // Extract each matching file
    let multiple_files = cli.pipe && files_to_extract.len() > 1;
    for entry in files_to_extract {
        extract_file(extractor, entry, cli, multiple_files)?;
    }

    Ok(())
}

/// Whether `entry` passes the positional name filters and the `-x` exclusions.
///
/// Directories are skipped; they are created as a side effect of extracting
/// the files inside them.
fn is_selected(entry: &DirectoryRecord, cli: &Cli) -> bool {
    if entry.is_directory() {
        return false;
    }
    let name = entry.file_name();

    if !cli.files.is_empty() {
        let matches = cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, name)
            } else {
                // No wildcards: exact match on filename or full path
                let basename = Path::new(name)
                    .file_name()
                    .map(|s| s.to_string_lossy())
                    .unwrap_or_default();
                name == f.as_str() || basename == f.as_str()
            }
        });
        if !matches {
            return false;
        }
    }

    !cli.exclude
        .iter()
        .any(|x| name.contains(x.as_str()) || glob_match(x, name))
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio,
///   method, encryption and timestamps
///
/// # Arguments
///
/// * `extractor` - The opened archive
/// * `verbose` - If true, display detailed information in table format
fn list_files(extractor: &ZipExtractor, verbose: bool) {
    let entries = extractor.entries();

    if !verbose {
        for entry in entries {
            println!("{}", entry.file_name());
        }
        return;
    }

    if !extractor.comment().is_empty() {
        println!("{}", extractor.comment());
    }
    println!(
        "{:>10}  {:<6}  {:>10}  {:>5}  {:>10}  {:>5}  {:>8}  Name",
        "Length", "Method", "Size", "Cmpr", "Date", "Time", "CRC-32"
    );
    println!("{}", "-".repeat(80));

    // Track totals for summary line
    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        let modified = entry.last_modified();
        let marker = if entry.is_encrypted() { "*" } else { "" };
        println!(
            "{:>10}  {:<6}  {:>10}  {}  {}  {:08x}  {}{}",
            entry.uncompressed_size(),
            entry.effective_compression_method().name(),
            entry.compressed_size(),
            ratio(entry.compressed_size(), entry.uncompressed_size()),
            modified.format("%Y-%m-%d  %H:%M"),
            entry.crc32(),
            entry.file_name(),
            marker
        );

        // Accumulate totals (excluding directories)
        if !entry.is_directory() {
            total_uncompressed += entry.uncompressed_size();
            total_compressed += entry.compressed_size();
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(80));
    println!(
        "{:>10}  {:<6}  {:>10}  {}  {:>28}  {} files",
        total_uncompressed,
        "",
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    );
}

/// Space saved by compression, as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Extract a single file from the archive.
///
/// Handles various extraction options:
/// - Pipe mode (`-p`): Write to stdout instead of file
/// - Custom output directory (`-d`): Extract to specified directory
/// - Junk paths (`-j`): Ignore directory structure in archive
/// - Overwrite control (`-n`, `-o`): Handle existing files
///
/// # Arguments
///
/// * `extractor` - The opened archive
/// * `entry` - The directory record to extract
/// * `cli` - Parsed command-line arguments
/// * `show_filename` - If true, print filename marker before content
///   (for pipe mode with multiple files)
///
/// # Returns
///
/// Returns `Ok(())` on success, or an error if extraction fails.
fn extract_file(
    extractor: &ZipExtractor,
    entry: &DirectoryRecord,
    cli: &Cli,
    show_filename: bool,
) -> Result<()> {
    let name = entry.file_name();

    // Pipe mode: write file contents directly to stdout
    if cli.pipe {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        if show_filename {
            writeln!(stdout, "--- {name} ---")?;
        }
        extractor
            .extract_to_writer(entry, cli.password_bytes(), &mut stdout, None)
            .with_context(|| format!("cannot extract {name}"))?;
        stdout.flush()?;
        return Ok(());
    }

    let output_path = destination_for(entry, cli)?;

    // Handle existing files based on overwrite options
    if output_path.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {name} (file exists)");
            }
            return Ok(());
        }

        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {name} (use -o to overwrite)");
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  extracting: {name}");
    }

    extractor
        .extract_to_file(entry, cli.password_bytes(), &output_path)
        .with_context(|| format!("cannot extract {name}"))?;

    Ok(())
}

/// Where an entry lands on disk.
///
/// Names that would escape the destination (absolute paths or `..`
/// components) are refused.
fn destination_for(entry: &DirectoryRecord, cli: &Cli) -> Result<PathBuf> {
    let name = entry.file_name();
    let relative = if cli.junk_paths {
        // Junk paths: use only the base filename, ignore directory structure
        Path::new(name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(name))
    } else {
        PathBuf::from(name)
    };

    if relative
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir))
    {
        anyhow::bail!("refusing to extract {name}: path leaves the destination directory");
    }

    Ok(match cli.extract_dir {
        Some(ref dir) => PathBuf::from(dir).join(relative),
        None => relative,
    })
}

/// Check if a pattern contains glob wildcard characters.
///
/// # Arguments
///
/// * `pattern` - The pattern to check
///
/// # Returns
///
/// Returns `true` if the pattern contains `*` or `?` wildcards.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
///
/// # Examples
///
/// ```ignore
/// assert!(glob_match("*.txt", "readme.txt"));
/// assert!(glob_match("file?.dat", "file1.dat"));
/// assert!(!glob_match("*.txt", "readme.md"));
/// ```
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star matches zero characters, or one and stays for more
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("docs/*", "docs/a/b.md"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(!glob_match("*.txt", "readme.md"));
        assert!(!glob_match("file?.dat", "file10.dat"));
    }

    #[test]
    fn compression_ratio() {
        assert_eq!(ratio(25, 100), "  75%");
        assert_eq!(ratio(0, 0), "  0%");
        assert_eq!(ratio(120, 100), "  0%");
    }
}
