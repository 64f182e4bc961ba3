use crate::harness::{AuditOutcome, AuditReport, AuditStatus};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt::Display;
use std::io;

/// Writes `report` as a JUnit XML document with one `<testsuite>`.
pub fn write_junit<W: io::Write>(
    report: &AuditReport,
    suite_name: &str,
    out: W,
) -> io::Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;

    writer
        .write_event(Event::Start(BytesStart::new("testsuites")))
        .map_err(xml_error)?;

    let total_ms: u128 = report.outcomes.iter().map(|o| o.duration_ms).sum();
    let tests = report.outcomes.len().to_string();
    let failures = report.count(AuditStatus::Failed).to_string();
    let errors = report.count(AuditStatus::Errored).to_string();
    let time = seconds(total_ms);

    let mut suite = BytesStart::new("testsuite");
    suite.push_attribute(("name", suite_name));
    suite.push_attribute(("tests", tests.as_str()));
    suite.push_attribute(("failures", failures.as_str()));
    suite.push_attribute(("errors", errors.as_str()));
    suite.push_attribute(("time", time.as_str()));
    writer.write_event(Event::Start(suite)).map_err(xml_error)?;

    for outcome in &report.outcomes {
        write_case(&mut writer, suite_name, outcome)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("testsuite")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("testsuites")))
        .map_err(xml_error)?;
    Ok(())
}

fn write_case<W: io::Write>(
    writer: &mut Writer<W>,
    suite_name: &str,
    outcome: &AuditOutcome,
) -> io::Result<()> {
    let time = seconds(outcome.duration_ms);
    let mut case = BytesStart::new("testcase");
    case.push_attribute(("name", outcome.name.as_str()));
    case.push_attribute(("classname", suite_name));
    case.push_attribute(("time", time.as_str()));

    let element = match outcome.status {
        AuditStatus::Passed => None,
        AuditStatus::Failed => Some("failure"),
        AuditStatus::Errored => Some("error"),
    };

    if element.is_none() && outcome.artifact.is_none() {
        return writer.write_event(Event::Empty(case)).map_err(xml_error);
    }

    writer.write_event(Event::Start(case)).map_err(xml_error)?;

    if let Some(tag) = element {
        let message = outcome.message.as_deref().unwrap_or("audit did not pass");
        let stage = format!("{:?}", outcome.reached);
        let mut detail = BytesStart::new(tag);
        detail.push_attribute(("message", message));
        detail.push_attribute(("type", stage.as_str()));
        writer.write_event(Event::Start(detail)).map_err(xml_error)?;
        writer
            .write_event(Event::Text(BytesText::new(message)))
            .map_err(xml_error)?;
        writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .map_err(xml_error)?;
    }

    if let Some(artifact) = &outcome.artifact {
        writer
            .write_event(Event::Start(BytesStart::new("system-out")))
            .map_err(xml_error)?;
        writer
            .write_event(Event::Text(BytesText::new(&format!("artifact: {artifact}"))))
            .map_err(xml_error)?;
        writer
            .write_event(Event::End(BytesEnd::new("system-out")))
            .map_err(xml_error)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("testcase")))
        .map_err(xml_error)
}

fn seconds(ms: u128) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

fn xml_error<E: Display>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("failed to write JUnit XML: {err}"))
}
