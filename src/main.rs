mod container;
mod errors;
mod formats;
mod utils;

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use container::{DirSink, ExtractReport, Selector, Sink};
use formats::oeminfo::{self, analyze::PayloadInfo};
use formats::update_app;
use utils::compression::decompress_gzip;

#[derive(Parser, Debug)]
#[command(
    name = "hwfwtool",
    about = "Extractor/repacker for UPDATE.APP and OEMINFO firmware containers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the entries of a firmware container.
    List { image: PathBuf },
    /// Extract entries into an output folder.
    Extract {
        image: PathBuf,
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
        /// "all", an id list (e.g. 0x01,0x02), or a partition name.
        #[arg(short, long, default_value = "all")]
        entries: String,
    },
    /// Replace OEMINFO entries from a folder of entry_0x<id>.bin files
    /// and write a new image.
    Repack {
        image: PathBuf,
        input: PathBuf,
        #[arg(short, long, default_value = "oeminfo.pack")]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("hwfwtool Firmware container tool");
    let cli = Cli::parse();

    match cli.command {
        Command::List { image } => run_list(&image),
        Command::Extract {
            image,
            output,
            entries,
        } => run_extract(&image, &output, &entries),
        Command::Repack {
            image,
            input,
            output,
        } => run_repack(&image, &input, &output),
    }
}

fn run_list(image: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Input: {}\n", image.display());
    let file = File::open(image)?;

    if update_app::is_update_app_file(&file) {
        println!("UPDATE.APP image detected!");
        let app = update_app::UpdateApp::parse(file)?;
        println!(
            "Image info -\nTotal size: {}\nVersion: {}\nBlocks: {}\n",
            app.total_size(),
            app.version(),
            app.entries().len()
        );
        println!("ID         | Name             | Size      | Checksum");
        println!("-----------|------------------|-----------|-----------");
        for entry in app.entries() {
            println!(
                "{:#010x} | {:<16} | {:>9} | {:#010x}",
                entry.id,
                entry.name,
                entry.length,
                entry.checksum.unwrap_or(0)
            );
        }
    } else if oeminfo::is_oeminfo_file(&file) {
        println!("OEMINFO image detected!");
        drop(file);
        let codec = oeminfo::OemInfo::parse(fs::read(image)?)?;
        println!(
            "Found {} entries (image version {}):\n",
            codec.entries().len(),
            codec.version()
        );
        println!("ID     | Type   | Length  | Age | Capacity | Offset   | Info");
        println!("-------|--------|---------|-----|----------|----------|------------------------");
        for slot in codec.slots().iter().filter(|s| s.used > 0) {
            let info = oeminfo::analyze::analyze(codec.entry_data(slot.id)?);
            println!(
                "{:#06x} | {:#06x} | {:>7} | {:>3} | {:>8} | {:#08x} | {}",
                slot.id,
                slot.kind,
                slot.used,
                slot.age,
                slot.capacity,
                slot.data_offset,
                info.describe()
            );
        }
    } else {
        println!("Input format not recognized!");
    }

    Ok(())
}

fn run_extract(
    image: &Path,
    output: &Path,
    entries: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Input: {}", image.display());
    println!("Output folder: {}", output.display());
    let file = File::open(image)?;
    let selector = Selector::parse(entries);
    let mut sink = DirSink::new(output);

    if update_app::is_update_app_file(&file) {
        println!("\nUPDATE.APP image detected!");
        let mut app = update_app::UpdateApp::parse(file)?;
        let report = app.extract(&selector, &mut sink)?;
        print_summary(&report);
    } else if oeminfo::is_oeminfo_file(&file) {
        println!("\nOEMINFO image detected!");
        drop(file);
        let codec = oeminfo::OemInfo::parse(fs::read(image)?)?;
        let report = codec.unpack(&selector, &mut sink)?;
        let images = extract_images(&codec, &selector, &mut sink)?;
        print_summary(&report);
        if images > 0 {
            println!("Also decoded {} image entries to 'images/'.", images);
        }
    } else {
        println!("Input format not recognized!");
    }

    Ok(())
}

/// Drop decoded copies of gzipped resource entries next to the raw dumps.
/// The raw entry payloads are written regardless.
fn extract_images(
    codec: &oeminfo::OemInfo,
    selector: &Selector,
    sink: &mut dyn Sink,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut count = 0;
    for entry in codec.entries().iter().filter(|e| selector.matches(e)) {
        let data = codec.entry_data(entry.id)?;
        match oeminfo::analyze::analyze(data) {
            PayloadInfo::GzipBmp {
                filename,
                gzip_offset,
                width,
                height,
                ..
            } => {
                let decoded = decompress_gzip(&data[gzip_offset..])?;
                let stem = file_name_part(&filename);
                let name = if stem.is_empty() {
                    format!("images/{}_{}x{}.bmp", entry.name, width, height)
                } else {
                    format!("images/{}_{}", entry.name, stem)
                };
                sink.write_entry(&name, &decoded)?;
                println!("- Decoded image: {}", name);
                count += 1;
            }
            PayloadInfo::GzipData {
                filename,
                gzip_offset,
            } => {
                let decoded = decompress_gzip(&data[gzip_offset..])?;
                let part = file_name_part(&filename);
                let name = if part.is_empty() {
                    format!("images/{}_decompressed.bin", entry.name)
                } else {
                    format!("images/{}_{}", entry.name, part)
                };
                sink.write_entry(&name, &decoded)?;
                println!("- Decoded data: {}", name);
                count += 1;
            }
            _ => {}
        }
    }
    Ok(count)
}

//embedded gzip names are untrusted, keep only the file name portion
fn file_name_part(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn run_repack(
    image: &Path,
    input: &Path,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Input: {}", image.display());
    let file = File::open(image)?;

    if update_app::is_update_app_file(&file) {
        return Err("Repack is not supported for UPDATE.APP images".into());
    }
    if !oeminfo::is_oeminfo_file(&file) {
        println!("Input format not recognized!");
        return Ok(());
    }
    drop(file);

    let codec = oeminfo::OemInfo::parse(fs::read(image)?)?;
    let replacements = container::load_replacements(input)?;
    if replacements.is_empty() {
        println!("No entry_0x<id>.bin files found in '{}'!", input.display());
        return Ok(());
    }

    println!("\nRepacking {} entries...", replacements.len());
    let new_image = codec.repack(&replacements)?;

    //write to a temporary name, rename only once the image is complete
    let mut tmp_name = output.as_os_str().to_os_string();
    tmp_name.push(".part");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, &new_image)?;
    fs::rename(&tmp_path, output)?;

    println!(
        "Repacked {} entries to '{}'.",
        replacements.len(),
        output.display()
    );
    Ok(())
}

fn print_summary(report: &ExtractReport) {
    println!("\nExtraction finished!");
    if !report.is_clean() {
        println!(
            "{} of {} entries failed!",
            report.failures.len(),
            report.failures.len() + report.written.len()
        );
    }
}
