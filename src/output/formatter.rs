//! Output formatters for job outcomes
//!
//! The sink feeds every finished job to a [`Formatter`] and calls
//! [`Formatter::finalize`] once the run is complete. Console, JSON, CSV and
//! one-line summary renderings are provided; several can run side by side
//! through [`FormatterSet`].

use serde::Serialize;
use std::io::{self, IsTerminal, Write};
use tracing::warn;

use crate::models::{Outcome, RunSummary};

/// Receiver of per-job outcome events
pub trait Formatter {
    fn job_finished(&mut self, outcome: &Outcome);
    fn finalize(&mut self);
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Console,
    Json,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "console" | "progress" => Some(OutputFormat::Console),
            "json" => Some(OutputFormat::Json),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Console => "console",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Summary => "summary",
        }
    }
}

fn report_write_error(format: OutputFormat, result: io::Result<()>) {
    if let Err(e) = result {
        warn!(format = format.name(), error = %e, "Failed to write output");
    }
}

/// Progress marks while running, failure details and totals at the end
pub struct ConsoleFormatter<W: Write> {
    out: W,
    colorize: bool,
    summary: RunSummary,
    failures: Vec<Outcome>,
}

impl<W: Write> ConsoleFormatter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            colorize: true,
            summary: RunSummary::default(),
            failures: Vec::new(),
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn paint(&self, text: &str, color: &str) -> String {
        if self.colorize {
            format!("\x1b[{color}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn write_mark(&mut self, passed: bool) -> io::Result<()> {
        let mark = if passed {
            self.paint(".", "32")
        } else {
            self.paint("F", "31")
        };
        write!(self.out, "{mark}")?;
        self.out.flush()
    }

    fn write_report(&mut self) -> io::Result<()> {
        writeln!(self.out)?;

        if !self.failures.is_empty() {
            writeln!(self.out, "\nFailures:\n")?;
            for (index, outcome) in self.failures.iter().enumerate() {
                let worker = outcome
                    .job
                    .worker
                    .map(|w| format!(" ({w})"))
                    .unwrap_or_default();
                let header = format!("  {}) {}{}", index + 1, outcome.job.describe(), worker);
                writeln!(self.out, "{}", self.paint(&header, "31"))?;
                for line in outcome.output.lines() {
                    writeln!(self.out, "     {line}")?;
                }
                writeln!(self.out)?;
            }
        }

        let color = if self.summary.is_all_passed() { "32" } else { "31" };
        let line = self.paint(&self.summary.to_string(), color);
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Formatter for ConsoleFormatter<W> {
    fn job_finished(&mut self, outcome: &Outcome) {
        self.summary.record(outcome);
        if !outcome.passed() {
            self.failures.push(outcome.clone());
        }
        let result = self.write_mark(outcome.passed());
        report_write_error(OutputFormat::Console, result);
    }

    fn finalize(&mut self) {
        let result = self.write_report();
        report_write_error(OutputFormat::Console, result);
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonEvent<'a> {
    JobFinished {
        id: u64,
        args: &'a [String],
        worker: Option<u32>,
        failed: bool,
        exit_code: Option<i32>,
        duration_ms: u64,
        output: &'a str,
    },
    Summary(&'a RunSummary),
}

/// One JSON object per line
pub struct JsonFormatter<W: Write> {
    out: W,
    summary: RunSummary,
}

impl<W: Write> JsonFormatter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            summary: RunSummary::default(),
        }
    }

    fn emit(&mut self, event: &JsonEvent<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, event)?;
        writeln!(self.out)?;
        self.out.flush()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Formatter for JsonFormatter<W> {
    fn job_finished(&mut self, outcome: &Outcome) {
        self.summary.record(outcome);
        let event = JsonEvent::JobFinished {
            id: outcome.job.id.0,
            args: &outcome.job.args,
            worker: outcome.job.worker.map(|w| w.0),
            failed: outcome.job.failed(),
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration_ms,
            output: &outcome.output,
        };
        let result = self.emit(&event);
        report_write_error(OutputFormat::Json, result);
    }

    fn finalize(&mut self) {
        let summary = self.summary.clone();
        let result = self.emit(&JsonEvent::Summary(&summary));
        report_write_error(OutputFormat::Json, result);
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: u64,
    args: String,
    worker: Option<u32>,
    status: &'a str,
    exit_code: Option<i32>,
    duration_ms: u64,
}

/// One CSV row per job, header first
pub struct CsvFormatter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvFormatter<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(out),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.writer.into_inner().map_err(|e| e.into_error()).unwrap()
    }
}

impl<W: Write> Formatter for CsvFormatter<W> {
    fn job_finished(&mut self, outcome: &Outcome) {
        let row = CsvRow {
            id: outcome.job.id.0,
            args: outcome.job.describe(),
            worker: outcome.job.worker.map(|w| w.0),
            status: if outcome.passed() { "pass" } else { "fail" },
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration_ms,
        };
        if let Err(e) = self.writer.serialize(row) {
            warn!(format = "csv", error = %e, "Failed to write output");
        }
    }

    fn finalize(&mut self) {
        let result = self.writer.flush();
        report_write_error(OutputFormat::Csv, result);
    }
}

/// Single totals line at the end of the run
pub struct SummaryFormatter<W: Write> {
    out: W,
    summary: RunSummary,
}

impl<W: Write> SummaryFormatter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            summary: RunSummary::default(),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Formatter for SummaryFormatter<W> {
    fn job_finished(&mut self, outcome: &Outcome) {
        self.summary.record(outcome);
    }

    fn finalize(&mut self) {
        let result = writeln!(self.out, "{}", self.summary).and_then(|_| self.out.flush());
        report_write_error(OutputFormat::Summary, result);
    }
}

/// Fan-out to several formatters
#[derive(Default)]
pub struct FormatterSet {
    formatters: Vec<Box<dyn Formatter + Send>>,
}

impl FormatterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, formatter: impl Formatter + Send + 'static) -> Self {
        self.formatters.push(Box::new(formatter));
        self
    }

    /// Formatters writing to standard output
    pub fn stdout(formats: &[OutputFormat]) -> Self {
        let colorize = io::stdout().is_terminal();
        formats.iter().fold(Self::new(), |set, format| match format {
            OutputFormat::Console => {
                let console = ConsoleFormatter::new(io::stdout());
                set.with(if colorize { console } else { console.no_color() })
            }
            OutputFormat::Json => set.with(JsonFormatter::new(io::stdout())),
            OutputFormat::Csv => set.with(CsvFormatter::new(io::stdout())),
            OutputFormat::Summary => set.with(SummaryFormatter::new(io::stdout())),
        })
    }
}

impl Formatter for FormatterSet {
    fn job_finished(&mut self, outcome: &Outcome) {
        for formatter in &mut self.formatters {
            formatter.job_finished(outcome);
        }
    }

    fn finalize(&mut self) {
        for formatter in &mut self.formatters {
            formatter.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::Recorder;
    use crate::models::{Job, JobId, WorkerId};

    fn outcome(id: u64, passed: bool) -> Outcome {
        let mut job = Job::new(JobId(id), vec![format!("features/{id}.feature")]);
        job.worker = Some(WorkerId(1));
        job.record(passed);
        Outcome {
            job,
            output: if passed { String::new() } else { "expected 1, got 2".into() },
            exit_code: Some(if passed { 0 } else { 1 }),
            duration_ms: 5,
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("CONSOLE"), Some(OutputFormat::Console));
        assert_eq!(OutputFormat::from_str(" csv "), Some(OutputFormat::Csv));
        assert_eq!(OutputFormat::from_str("junit"), None);
    }

    #[test]
    fn test_console_formatter() {
        let mut console = ConsoleFormatter::new(Vec::new()).no_color();
        console.job_finished(&outcome(0, true));
        console.job_finished(&outcome(1, false));
        console.finalize();

        let text = String::from_utf8(console.into_inner()).unwrap();
        assert!(text.starts_with(".F\n"));
        assert!(text.contains("1) features/1.feature (worker 1)"));
        assert!(text.contains("expected 1, got 2"));
        assert!(text.contains("2 jobs, 1 passed, 1 failed"));
    }

    #[test]
    fn test_json_formatter() {
        let mut json = JsonFormatter::new(Vec::new());
        json.job_finished(&outcome(3, false));
        json.finalize();

        let text = String::from_utf8(json.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "job_finished");
        assert_eq!(lines[0]["id"], 3);
        assert_eq!(lines[0]["failed"], true);
        assert_eq!(lines[1]["event"], "summary");
        assert_eq!(lines[1]["failed"], 1);
    }

    #[test]
    fn test_csv_formatter() {
        let mut csv = CsvFormatter::new(Vec::new());
        csv.job_finished(&outcome(0, true));
        csv.job_finished(&outcome(1, false));
        csv.finalize();

        let text = String::from_utf8(csv.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id,args,worker,status,exit_code,duration_ms");
        assert_eq!(lines[1], "0,features/0.feature,1,pass,0,5");
        assert_eq!(lines[2], "1,features/1.feature,1,fail,1,5");
    }

    #[test]
    fn test_summary_formatter() {
        let mut summary = SummaryFormatter::new(Vec::new());
        summary.job_finished(&outcome(0, true));
        summary.finalize();

        let text = String::from_utf8(summary.into_inner()).unwrap();
        assert!(text.starts_with("1 jobs, 1 passed, 0 failed"));
    }

    #[test]
    fn test_formatter_set_fans_out() {
        let recorder = Recorder::default();
        let mut set = FormatterSet::new()
            .with(recorder.clone())
            .with(recorder.clone());
        set.job_finished(&outcome(3, false));
        set.finalize();

        assert_eq!(*recorder.seen.lock().unwrap(), vec![JobId(3), JobId(3)]);
        assert!(*recorder.finalized.lock().unwrap());
    }
}
