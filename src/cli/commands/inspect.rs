use serde::Serialize;

use crate::cli::utils::output;
use crate::cli::OutputFormat;
use crate::security::sanitizer::{detect_injection, sanitize_parameter, ParamKind};

#[derive(Debug, Serialize)]
pub struct Sanitized {
    pub input: String,
    pub output: String,
    pub changed: bool,
}

pub fn sanitize(text: &str, kind: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let kind: ParamKind = kind.parse().map_err(anyhow::Error::msg)?;
    let cleaned = sanitize_parameter(text, kind)?;

    let result = Sanitized {
        input: text.to_string(),
        changed: cleaned != text,
        output: cleaned,
    };

    output(output_format, &result, |r| println!("{}", r.output))
}

pub fn scan(text: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let report = detect_injection(text);

    output(output_format, &report, |r| {
        if !r.is_suspicious {
            println!("✓ clean ({} chars)", r.input_length);
            return;
        }
        println!("⚠ risk {:?}: {} pattern(s)", r.risk_level, r.detected_patterns.len());
        for hit in &r.detected_patterns {
            println!("  [{}] {} -> {:?}", hit.pattern_id, hit.description, hit.matches);
        }
        println!("sanitized: {}", r.sanitized_input);
    })
}
