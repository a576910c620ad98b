use std::io::{self, Write};

use serde::Serialize;

use crate::app::{PapersReport, SyncAllReport, SyncReport};
use crate::portal::Dataset;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_sync(report: &SyncReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_sync_all(report: &SyncAllReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_papers(report: &PapersReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_datasets(datasets: &[Dataset]) -> io::Result<()> {
        Self::print_json(&datasets)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
