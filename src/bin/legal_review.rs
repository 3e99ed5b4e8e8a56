//! CLI for assembling legal documents and asking questions about them

use clap::{Parser, Subcommand};
use legal_review::{
    Assembler, Document, DocumentMetadata, Findings, HttpModel, ModelConfig, OcrEngine,
    PdftoppmCli, PdftoppmConfig, PipelineConfig, Router, TesseractCli, TesseractConfig,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "legal-review", version, about = "Normalize legal documents and route questions about them")]
struct Cli {
    /// Target resolution for scanned pages
    #[arg(long, global = true, default_value_t = 300)]
    dpi: u32,

    /// Path to the tesseract executable
    #[arg(long, global = true, default_value = "tesseract")]
    tesseract: PathBuf,

    /// Path to the pdftoppm executable used to render scanned pages
    #[arg(long, global = true, default_value = "pdftoppm")]
    pdftoppm: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a document and print its metadata
    Assemble {
        file: PathBuf,
        /// Print metadata as JSON
        #[arg(long)]
        json: bool,
        /// Also print the assembled text
        #[arg(long)]
        text: bool,
    },
    /// Assemble a document and answer a question about it
    Ask {
        file: PathBuf,
        query: String,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,legal_review=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(message) = run(cli) {
        eprintln!("Error: {}", message);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let engine: Arc<dyn OcrEngine> = Arc::new(TesseractCli::new(TesseractConfig {
        binary: cli.tesseract.clone(),
        ..TesseractConfig::default()
    }));
    let mut config = PipelineConfig::default();
    config.raster.dpi = cli.dpi;
    let renderer = Arc::new(PdftoppmCli::new(PdftoppmConfig {
        binary: cli.pdftoppm.clone(),
    }));
    let assembler = Assembler::with_config(engine, config).with_renderer(renderer);

    match cli.command {
        Command::Assemble { file, json, text } => {
            let start = Instant::now();
            let document = assembler.assemble_path(&file).map_err(|e| e.to_string())?;
            let metadata = document.metadata();

            if json {
                let out = serde_json::to_string_pretty(&metadata).map_err(|e| e.to_string())?;
                println!("{}", out);
            } else {
                print_metadata(&metadata);
                println!("Assembly time: {}ms", start.elapsed().as_millis());
            }
            if text {
                println!();
                println!("{}", document.assembled_text());
            }
            Ok(())
        }
        Command::Ask { file, query, json } => {
            let document = assembler.assemble_path(&file).map_err(|e| e.to_string())?;
            let model_config = ModelConfig::from_env().map_err(|e| e.to_string())?;
            let model = HttpModel::new(model_config).map_err(|e| e.to_string())?;

            let response = Router::new(model)
                .answer(&document, &query)
                .map_err(|e| e.to_string())?;

            if json {
                let out = serde_json::to_string_pretty(&response).map_err(|e| e.to_string())?;
                println!("{}", out);
            } else {
                print_header(&document, &response.handler.to_string());
                println!("{}", response.body);
                print_findings(&response.findings);
                if !response.citations.is_empty() {
                    let pages: Vec<String> = response.citations.iter().map(|p| p.to_string()).collect();
                    println!();
                    println!("Cited pages: {}", pages.join(", "));
                }
            }
            Ok(())
        }
    }
}

fn print_metadata(metadata: &DocumentMetadata) {
    println!("Document Assembly Results");
    println!("=========================");
    if let Some(name) = &metadata.file_name {
        println!("File: {}", name);
    }
    println!("Type: {}", metadata.kind.as_str());
    println!("Size: {:.2} MB", metadata.size_mb);
    println!();
    println!("Pages: {}", metadata.page_count);
    println!("  native text: {}", metadata.native_pages);
    println!("  OCR: {}", metadata.ocr_pages);
    for rotated in &metadata.rotated_pages {
        println!("  page {} rotated {} degrees", rotated.page, rotated.degrees);
    }
    if !metadata.failed_pages.is_empty() {
        let failed: Vec<String> = metadata.failed_pages.iter().map(|p| p.to_string()).collect();
        println!("  failed: {}", failed.join(", "));
    }
    if let Some(confidence) = metadata.mean_ocr_confidence {
        println!("OCR confidence: {:.0}%", confidence * 100.0);
    }
    if let Some(dpi) = metadata.dpi_used {
        println!("DPI: {}", dpi);
    }
    println!("Characters: {}", metadata.char_count);
    println!("Words: {}", metadata.word_count);
}

fn print_header(document: &Document, handler: &str) {
    println!(
        "[{} | {} pages | {}]",
        document.file_name().unwrap_or("document"),
        document.page_count(),
        handler
    );
    println!();
}

fn print_findings(findings: &Findings) {
    match findings {
        Findings::Clauses(quotes) if !quotes.is_empty() => {
            println!();
            println!("Quoted clauses:");
            for quote in quotes {
                match quote.page {
                    Some(page) => println!("  p.{}: \"{}\"", page, quote.text),
                    None => println!("  \"{}\"", quote.text),
                }
            }
        }
        Findings::Compliance(flags) if !flags.is_empty() => {
            println!();
            println!("Flagged statutes:");
            for flag in flags {
                println!("  [{}] {}", flag.statutes.join(", "), flag.finding);
            }
        }
        Findings::Risks(items) if !items.is_empty() => {
            println!();
            println!("Rated risks:");
            for item in items {
                println!("  {:?}: {}", item.severity, item.description);
            }
        }
        _ => {}
    }
}
