use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use patchwire_cache::ResultTree;
use patchwire_frame::{Part, PartBody};
use patchwire_payload::{GraphQLError, Path};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PartOutput<'a> {
    index: usize,
    content_type: Option<&'a str>,
    kind: &'static str,
    size: usize,
    body: Value,
}

pub fn print_part(index: usize, part: &Part, format: OutputFormat) {
    let (kind, body) = match &part.body {
        PartBody::Json(value) => ("json", value.clone()),
        PartBody::Text(text) => ("text", Value::String(text.clone())),
    };
    let rendered = match &part.body {
        PartBody::Json(value) => value.to_string(),
        PartBody::Text(text) => text.clone(),
    };

    match format {
        OutputFormat::Json => {
            let out = PartOutput {
                index,
                content_type: part.content_type(),
                kind,
                size: rendered.len(),
                body,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PART", "CONTENT-TYPE", "SIZE", "BODY"])
                .add_row(vec![
                    index.to_string(),
                    part.content_type().unwrap_or("-").to_string(),
                    rendered.len().to_string(),
                    rendered,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let pretty = match &part.body {
                PartBody::Json(value) => {
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| rendered.clone())
                }
                PartBody::Text(_) => rendered.clone(),
            };
            println!("part {index} ({kind}, {} bytes)\n{pretty}", rendered.len());
        }
        OutputFormat::Raw => {
            print_raw(rendered.as_bytes());
            print_raw(b"\n");
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultOutput<'a> {
    operation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a Path>,
    payloads: usize,
    has_next: bool,
    data: &'a Value,
    #[serde(skip_serializing_if = "no_errors")]
    errors: &'a [GraphQLError],
}

fn no_errors(errors: &&[GraphQLError]) -> bool {
    errors.is_empty()
}

/// Print a merged result. `path` names the payload that produced it, when
/// printing progressive snapshots.
pub fn print_result(operation: &str, path: Option<&Path>, tree: &ResultTree, format: OutputFormat) {
    let out = ResultOutput {
        operation,
        path,
        payloads: tree.payloads,
        has_next: tree.has_next,
        data: &tree.data,
        errors: &tree.errors,
    };

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PATH", "PAYLOADS", "HAS NEXT", "ERRORS", "DATA"])
                .add_row(vec![
                    path.map_or_else(|| "-".to_string(), |p| p.to_string()),
                    tree.payloads.to_string(),
                    tree.has_next.to_string(),
                    tree.errors.len().to_string(),
                    tree.data.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if let Some(path) = path {
                println!("# payload {} at {path}", tree.payloads);
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&tree.data).unwrap_or_else(|_| tree.data.to_string())
            );
            for error in &tree.errors {
                eprintln!("error: {}", error.message);
            }
        }
        OutputFormat::Raw => {
            print_raw(tree.data.to_string().as_bytes());
            print_raw(b"\n");
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}
