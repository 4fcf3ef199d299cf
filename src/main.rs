//! vox2dicom - convert a zipped Revvity/Rigaku VOX volume into a zipped DICOM series.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;

use vox_dicom::{
    EncoderConfig, ParseFailure, ParsedVolume, SeriesEncoder, VoxLoader,
    archive::{VoxArchive, output_archive_name, write_series_archive},
};

/// Header lines shown when a VOX file is rejected.
const DISPLAY_LOG_LINES: usize = 500;

struct Args {
    input: PathBuf,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    preview: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    let args = parse_args().unwrap_or_else(|| {
        print_usage();
        process::exit(1);
    });

    let config: EncoderConfig = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).unwrap_or_else(|e| {
                eprintln!("Error reading config file: {}", e);
                process::exit(1);
            });
            serde_json::from_str(&text).unwrap_or_else(|e| {
                eprintln!("Error parsing config: {}", e);
                process::exit(1);
            })
        }
        None => EncoderConfig::default(),
    };

    let (parsed, entry_name) = load_volume(&args.input);

    println!("VOX file parsed successfully:");
    match serde_json::to_string_pretty(&parsed.metadata) {
        Ok(json) => println!("{json}"),
        Err(e) => log::warn!("could not render metadata: {e}"),
    }

    if let Some(path) = &args.preview {
        let middle = parsed.grid.num_slices() / 2;
        match parsed.grid.slice_preview(middle) {
            Some(image) => {
                if let Err(e) = image.save(path) {
                    eprintln!("Error writing preview {}: {}", path.display(), e);
                }
            }
            None => log::warn!("volume has no slices to preview"),
        }
    }

    let records = SeriesEncoder::new(config)
        .encode(&parsed.grid, &parsed.metadata)
        .unwrap_or_else(|e| {
            eprintln!("Error creating DICOM series: {}", e);
            process::exit(1);
        });

    let output = args
        .output
        .unwrap_or_else(|| args.input.with_file_name(output_archive_name(&entry_name)));
    let file = File::create(&output).unwrap_or_else(|e| {
        eprintln!("Error creating {}: {}", output.display(), e);
        process::exit(1);
    });
    if let Err(e) = write_series_archive(&records, BufWriter::new(file)) {
        eprintln!("Error writing DICOM archive: {}", e);
        process::exit(1);
    }

    println!("Wrote {} DICOM files to {}", records.len(), output.display());
}

/// Parse the VOX volume from a ZIP archive or a bare `.vox` file.
fn load_volume(input: &Path) -> (ParsedVolume, String) {
    let loader = VoxLoader::default();
    let is_bare_vox = input
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("vox"));

    if is_bare_vox {
        let entry_name = input.to_string_lossy().into_owned();
        let parsed = loader.load_from_path(input).unwrap_or_else(|e| report_failure(e));
        return (parsed, entry_name);
    }

    let file = File::open(input).unwrap_or_else(|e| {
        eprintln!("Error opening {}: {}", input.display(), e);
        process::exit(1);
    });
    let mut archive = VoxArchive::open(file).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        process::exit(1);
    });
    let entry_name = archive.entry_name().to_string();
    let reader = archive.entry_reader().unwrap_or_else(|e| {
        eprintln!("Error reading {}: {}", entry_name, e);
        process::exit(1);
    });
    let parsed = loader.load_from_reader(reader).unwrap_or_else(|e| report_failure(e));
    (parsed, entry_name)
}

fn report_failure(failure: ParseFailure) -> ! {
    eprintln!("Failed to process the VOX file: {}", failure.kind);
    if let Some(metadata) = &failure.metadata {
        eprintln!("Header fields read before the failure: {:?}", metadata);
    }
    if !failure.log.is_empty() {
        eprintln!();
        eprintln!("Header content read from the file:");
        eprintln!("{}", failure.log.render(DISPLAY_LOG_LINES));
    }
    process::exit(1);
}

fn parse_args() -> Option<Args> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut preview = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next()?)),
            "--preview" => preview = Some(PathBuf::from(args.next()?)),
            "-h" | "--help" => return None,
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let mut positional = positional.into_iter();
    let input = positional.next()?;
    let output = positional.next();
    if positional.next().is_some() {
        return None;
    }

    Some(Args {
        input,
        output,
        config,
        preview,
    })
}

fn print_usage() {
    eprintln!(
        "Usage: vox2dicom <input.zip|input.vox> [output.zip] \
         [--config encoder.json] [--preview slice.png]"
    );
    eprintln!();
    eprintln!("Convert a Revvity/Rigaku VOX volume into a zipped DICOM series.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  input        ZIP archive holding exactly one .vox file, or a .vox file");
    eprintln!("  output       Output archive (default: <vox name>_dicom.zip next to the input)");
    eprintln!("  --config     JSON file with patient/study attributes");
    eprintln!("  --preview    Write the middle slice as a PNG image");
}
