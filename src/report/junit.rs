//! JUnit XML reading
//!
//! Only the `status` attribute decides pass/fail. `<failure>`/`<error>` are
//! read for their message and nothing else.

use super::types::{JUnitTestCaseResult, TestCaseStatus};
use crate::error::RunnerError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parse every `*.xml` directly inside `dir`.
///
/// A missing directory yields no results. Malformed files are skipped as a
/// whole with a warning.
pub fn parse_junit_test_cases(dir: &Path) -> Vec<JUnitTestCaseResult> {
    let mut files = match xml_files(dir) {
        Ok(files) => files,
        Err(e) => {
            log::debug!("No JUnit results in {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    files.sort();

    let mut cases = Vec::new();
    for file in files {
        match parse_junit_file(&file) {
            Ok(parsed) => cases.extend(parsed),
            Err(e) => log::warn!("Skipping JUnit file: {}", e),
        }
    }
    cases
}

fn xml_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "xml") {
            files.push(path);
        }
    }
    Ok(files)
}

pub fn parse_junit_file(path: &Path) -> Result<Vec<JUnitTestCaseResult>, RunnerError> {
    let content = std::fs::read_to_string(path).map_err(|e| RunnerError::ResultParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_junit_xml(&content).map_err(|message| RunnerError::ResultParse {
        path: path.to_path_buf(),
        message,
    })
}

/// Test case under construction
#[derive(Default)]
struct CaseBuilder {
    name: Option<String>,
    time: Option<String>,
    status: Option<String>,
    failure: Option<String>,
    error: Option<String>,
    properties: BTreeMap<String, String>,
}

impl CaseBuilder {
    fn from_start(e: &BytesStart) -> Self {
        let mut case = CaseBuilder::default();
        for attr in e.attributes().flatten() {
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_default();
            match attr.key.as_ref() {
                b"name" => case.name = Some(value),
                b"time" => case.time = Some(value),
                b"status" => case.status = Some(value),
                _ => {}
            }
        }
        case
    }

    fn build(mut self) -> Option<JUnitTestCaseResult> {
        let name = self.name.filter(|n| !n.is_empty())?;

        let tags = self
            .properties
            .remove("tags")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let status = if self.status.as_deref() == Some("SUCCESS") {
            TestCaseStatus::Passed
        } else {
            TestCaseStatus::Failed
        };

        Some(JUnitTestCaseResult {
            name,
            status,
            duration: duration_ms(self.time.as_deref()),
            error_message: self.failure.or(self.error),
            tags,
            properties: self.properties,
        })
    }
}

/// Seconds attribute to whole milliseconds, 0 when absent or not a number
fn duration_ms(time: Option<&str>) -> u64 {
    match time.and_then(|t| t.trim().parse::<f64>().ok()) {
        Some(secs) if secs.is_finite() && secs > 0.0 => (secs * 1000.0).round() as u64,
        _ => 0,
    }
}

/// Which message-bearing element the reader is inside
#[derive(Clone, Copy, PartialEq)]
enum Capture {
    None,
    Failure,
    Error,
}

fn attr_value(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

pub fn parse_junit_xml(content: &str) -> Result<Vec<JUnitTestCaseResult>, String> {
    let mut reader = Reader::from_str(content);

    let mut cases = Vec::new();
    let mut suite_depth = 0usize;
    let mut current: Option<CaseBuilder> = None;
    let mut capture = Capture::None;
    let mut text = String::new();
    let mut message: Option<String> = None;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"testsuite" => suite_depth += 1,
                b"testcase" if suite_depth > 0 => current = Some(CaseBuilder::from_start(e)),
                b"failure" if current.is_some() => {
                    capture = Capture::Failure;
                    text.clear();
                    message = attr_value(e, b"message");
                }
                b"error" if current.is_some() => {
                    capture = Capture::Error;
                    text.clear();
                    message = attr_value(e, b"message");
                }
                b"property" => add_property(&mut current, e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"testcase" if suite_depth > 0 => {
                    if let Some(case) = CaseBuilder::from_start(e).build() {
                        cases.push(case);
                    }
                }
                b"failure" => {
                    if let Some(case) = current.as_mut() {
                        case.failure.get_or_insert(attr_value(e, b"message").unwrap_or_default());
                    }
                }
                b"error" => {
                    if let Some(case) = current.as_mut() {
                        case.error.get_or_insert(attr_value(e, b"message").unwrap_or_default());
                    }
                }
                b"property" => add_property(&mut current, e),
                _ => {}
            },
            Ok(Event::Text(ref e)) if capture != Capture::None => {
                let chunk = e.unescape().map_err(|e| e.to_string())?;
                text.push_str(&chunk);
            }
            Ok(Event::CData(ref e)) if capture != Capture::None => {
                text.push_str(&String::from_utf8_lossy(e));
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"testsuite" => suite_depth = suite_depth.saturating_sub(1),
                b"testcase" => {
                    if let Some(case) = current.take().and_then(CaseBuilder::build) {
                        cases.push(case);
                    }
                }
                b"failure" if capture == Capture::Failure => {
                    let body = message_body(&text, message.take());
                    if let Some(case) = current.as_mut() {
                        case.failure.get_or_insert(body);
                    }
                    capture = Capture::None;
                }
                b"error" if capture == Capture::Error => {
                    let body = message_body(&text, message.take());
                    if let Some(case) = current.as_mut() {
                        case.error.get_or_insert(body);
                    }
                    capture = Capture::None;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    if suite_depth != 0 || current.is_some() {
        return Err("unexpected end of document".to_string());
    }

    Ok(cases)
}

/// Element text wins over the `message` attribute when both exist
fn message_body(text: &str, message: Option<String>) -> String {
    let text = text.trim();
    if text.is_empty() {
        message.unwrap_or_default()
    } else {
        text.to_string()
    }
}

fn add_property(current: &mut Option<CaseBuilder>, e: &BytesStart) {
    let Some(case) = current.as_mut() else {
        return;
    };
    if let Some(name) = attr_value(e, b"name") {
        let value = attr_value(e, b"value").unwrap_or_default();
        case.properties.insert(name, value);
    }
}
