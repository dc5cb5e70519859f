//! Quality metrics from granule metadata (`MTD_TL.xml`).

use crate::error::{Result, SentinelError};
use crate::types::QualityConstraints;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use tracing::{info, warn};

/// Reads the first numeric value of every element named in `wanted`.
///
/// Elements are matched by local name, so namespace prefixes are ignored.
/// Metrics missing from the document are missing from the result.
pub fn parse_metrics<'a, I>(xml: &[u8], wanted: I) -> Result<HashMap<String, f64>>
where
    I: IntoIterator<Item = &'a str>,
{
    let wanted: Vec<&str> = wanted.into_iter().collect();
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut values = HashMap::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                current = wanted.contains(&tag.as_str()).then_some(tag);
            }
            Event::End(_) => current = None,
            Event::Text(e) => {
                if let Some(tag) = current.take() {
                    if !values.contains_key(&tag) {
                        let text = e.unescape()?;
                        let value: f64 = text.trim().parse().map_err(|_| {
                            SentinelError::Metadata(format!("{} is not a number: {:?}", tag, text))
                        })?;
                        values.insert(tag, value);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(values)
}

/// Checks a metadata document against the quality constraints.
///
/// A metric above its maximum rejects the product. A metric missing from the
/// document is logged and does not disqualify it.
pub fn meets_constraints(
    xml: &[u8],
    constraints: &QualityConstraints,
    source: &str,
) -> Result<bool> {
    let values = parse_metrics(xml, constraints.metrics())?;

    for (metric, max) in constraints.iter() {
        match values.get(metric) {
            Some(&value) if value > max => {
                info!(
                    "Skipped {}: {} = {} is higher than the {} threshold",
                    source, metric, value, max
                );
                return Ok(false);
            }
            Some(_) => {}
            None => warn!("Constraint {} not present in metadata: {}", metric, source),
        }
    }
    Ok(true)
}
