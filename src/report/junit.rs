//! JUnit XML report generation.
//!
//! Every shard or test becomes one `<testcase>`. The output is compatible
//! with Jenkins, GitLab CI, GitHub Actions and other CI platforms.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="3" failures="1" errors="0" time="12.345">
//!   <testsuite name="shardrun" tests="3" failures="1" errors="0" skipped="0" time="12.345">
//!     <testcase classname="MathTest" name="Add" time="1.002"/>
//!     <testcase classname="MathTest" name="Sub" time="2.410">
//!       <system-out>passed on attempt 2 on gpu1</system-out>
//!     </testcase>
//!     <testcase classname="Flaky" name="Hang" time="1200.000">
//!       <failure message="idle timeout (exit code 124)" type="TIMEOUT">...</failure>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::{ItemOutcome, Reporter, RunVerdict, TerminalState, ensure_parent_dir};

/// Captured output kept in a failure body.
const MAX_FAILURE_OUTPUT: usize = 64 * 1024;

/// Reporter that writes a JUnit XML file when the run completes.
///
/// Parent directories are created as needed.
///
/// # Example
///
/// ```
/// use shardrun::report::JUnitReporter;
///
/// let reporter = JUnitReporter::new("test-results/junit.xml".into())
///     .with_testsuite_name("gpu-tests");
/// ```
pub struct JUnitReporter {
    output_path: PathBuf,
    testsuite_name: String,
}

impl JUnitReporter {
    /// Creates a reporter writing to `output_path`.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            testsuite_name: "shardrun".to_string(),
        }
    }

    /// Sets the `<testsuite name>`. Defaults to `shardrun`.
    pub fn with_testsuite_name(mut self, name: impl Into<String>) -> Self {
        self.testsuite_name = name.into();
        self
    }

    /// Renders the verdict as a JUnit XML document.
    pub fn generate_xml(&self, verdict: &RunVerdict) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let tests = verdict.items.len().to_string();
        let failures = verdict.failed_items().count().to_string();
        let time = format!("{:.3}", verdict.duration.as_secs_f64());

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.as_str()));
        testsuites.push_attribute(("failures", failures.as_str()));
        testsuites.push_attribute(("errors", "0"));
        testsuites.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuites))?;

        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", self.testsuite_name.as_str()));
        testsuite.push_attribute(("tests", tests.as_str()));
        testsuite.push_attribute(("failures", failures.as_str()));
        testsuite.push_attribute(("errors", "0"));
        testsuite.push_attribute(("skipped", "0"));
        testsuite.push_attribute(("time", time.as_str()));
        testsuite.push_attribute(("timestamp", verdict.started_at.to_rfc3339().as_str()));
        writer.write_event(Event::Start(testsuite))?;

        for item in &verdict.items {
            self.write_testcase(&mut writer, item)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        Ok(String::from_utf8(writer.into_inner())?)
    }

    fn write_testcase<W: std::io::Write>(
        &self,
        writer: &mut Writer<W>,
        item: &ItemOutcome,
    ) -> anyhow::Result<()> {
        let (classname, name) = split_test_name(&item.label, &self.testsuite_name);

        let mut testcase = BytesStart::new("testcase");
        testcase.push_attribute(("classname", classname.as_str()));
        testcase.push_attribute(("name", name.as_str()));
        testcase.push_attribute((
            "time",
            format!("{:.3}", item.duration().as_secs_f64()).as_str(),
        ));

        match item.state {
            TerminalState::Pass => {
                writer.write_event(Event::Empty(testcase))?;
            }
            TerminalState::PassOnRetry => {
                writer.write_event(Event::Start(testcase))?;
                writer.write_event(Event::Start(BytesStart::new("system-out")))?;
                let note = format!(
                    "passed on attempt {} on {}",
                    item.attempt_count(),
                    item.worker
                );
                writer.write_event(Event::Text(BytesText::new(&note)))?;
                writer.write_event(Event::End(BytesEnd::new("system-out")))?;
                writer.write_event(Event::End(BytesEnd::new("testcase")))?;
            }
            TerminalState::Fail | TerminalState::Timeout => {
                writer.write_event(Event::Start(testcase))?;

                let exit_code = item.final_result().map(|r| r.exit_code).unwrap_or_default();
                let message = if item.state == TerminalState::Timeout {
                    format!("idle timeout (exit code {})", exit_code)
                } else {
                    format!(
                        "exit code {} after {} attempt(s) on {}",
                        exit_code,
                        item.attempt_count(),
                        item.worker
                    )
                };
                let mut failure = BytesStart::new("failure");
                failure.push_attribute(("message", message.as_str()));
                failure.push_attribute(("type", item.state.as_str()));
                writer.write_event(Event::Start(failure))?;

                if let Some(result) = item.final_result() {
                    let output = sanitize_xml(tail(&result.combined_output, MAX_FAILURE_OUTPUT));
                    writer.write_event(Event::Text(BytesText::new(&output)))?;
                }

                writer.write_event(Event::End(BytesEnd::new("failure")))?;
                writer.write_event(Event::End(BytesEnd::new("testcase")))?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn on_discovery_complete(&self, _items: &[String]) {}

    async fn on_item_start(&self, _label: &str, _worker: &str) {}

    async fn on_item_complete(&self, _outcome: &ItemOutcome) {}

    async fn on_run_complete(&self, verdict: &RunVerdict) {
        match self.generate_xml(verdict) {
            Ok(xml) => {
                if let Err(e) = ensure_parent_dir(&self.output_path) {
                    tracing::error!("Failed to create output directory: {}", e);
                    return;
                }

                if let Err(e) = std::fs::write(&self.output_path, xml) {
                    tracing::error!("Failed to write JUnit XML: {}", e);
                } else {
                    tracing::info!("JUnit XML written to: {}", self.output_path.display());
                }
            }
            Err(e) => {
                tracing::error!("Failed to generate JUnit XML: {}", e);
            }
        }
    }
}

/// Splits `Suite.Test` into classname and name.
///
/// Labels without a dot (shard labels, plain names) use `default_class`.
fn split_test_name(label: &str, default_class: &str) -> (String, String) {
    match label.split_once('.') {
        Some((class, name)) if !class.is_empty() && !name.is_empty() => {
            (class.to_string(), name.to_string())
        }
        _ => (default_class.to_string(), label.to_string()),
    }
}

/// The last `max` bytes of `s`, cut on a character boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Drops characters that XML 1.0 cannot represent.
fn sanitize_xml(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}'))
        .collect()
}
