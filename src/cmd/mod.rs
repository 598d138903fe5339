//! Command-line entry points.

use clap::Args;

use crate::{pipeline::RunMode, prelude::*};

pub mod run;

/// Which documents to process. Exactly one of these must be given.
#[derive(Debug, Clone, Args)]
pub struct ModeOpts {
    /// Process a single PDF from the input directory. The `.pdf` extension
    /// is optional.
    #[clap(long, value_name = "FILENAME", conflicts_with = "all")]
    filename: Option<String>,

    /// Process every PDF in the input directory.
    #[clap(long)]
    all: bool,
}

impl ModeOpts {
    /// Decide what to run, or explain how to ask for something. An empty
    /// `--filename` counts as no filename.
    pub fn run_mode(&self) -> Result<RunMode> {
        let filename = self.filename.as_deref().filter(|f| !f.is_empty());
        match (filename, self.all) {
            (Some(filename), _) => Ok(RunMode::Single(filename.to_owned())),
            (None, true) => Ok(RunMode::All),
            (None, false) => Err(anyhow!(
                "No statement set. Use --filename <filename> to ocr one file or --all to ocr all files."
            )),
        }
    }
}
