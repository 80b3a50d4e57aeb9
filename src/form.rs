//! Upload form page
//!
//! Rendered once at startup from the format registry and the configured
//! upload limits, then served as static bytes on every GET.

use bytes::Bytes;
use std::fmt::Write;

use crate::config::ServerConfig;
use crate::format::{Format, FormatRegistry};
use crate::params::schema::{Constraint, ParamSpec, MP3_CHANNEL_MODE};
use crate::params::validator::FORMAT_FIELD;
use crate::params::ChannelMode;

/// Multipart field name the page uses for the uploaded file
pub const FILE_FIELD: &str = "form-file";

const STYLE: &str = r#"
    * { font-family: Verdana, sans-serif; }
    .container { width: 800px; margin: 0 auto; }
    .output-options { display: none; margin: 10px 0 20px 20px; }
    .limits { color: #666; font-size: 0.9em; }
    label { margin-right: 12px; }
"#;

// Posts to "/<uploaded file name>" so the server can detect the input format
// from the path, and shows the options of the selected output format only.
const SCRIPT: &str = r#"
    document.querySelectorAll('input[name="format"]').forEach(function (radio) {
        radio.addEventListener('change', function () {
            document.querySelectorAll('.output-options').forEach(function (el) {
                el.style.display = 'none';
            });
            document.getElementById(radio.value + '-options').style.display = 'block';
        });
    });
    document.getElementById('convert').addEventListener('submit', function () {
        var input = document.getElementById('input-file');
        if (input.files.length > 0) {
            this.action = '/' + encodeURIComponent(input.files[0].name);
        }
    });
"#;

/// Build the HTML form page.
pub fn render_form_page(registry: &FormatRegistry, config: &ServerConfig) -> Bytes {
    let mut html = String::with_capacity(4096);

    // Writing into a String cannot fail.
    let _ = write_page(&mut html, registry, config);
    Bytes::from(html)
}

fn write_page(html: &mut String, registry: &FormatRegistry, config: &ServerConfig) -> std::fmt::Result {
    writeln!(html, "<!DOCTYPE html>")?;
    writeln!(html, "<html>\n<head>\n<meta charset=\"utf-8\">")?;
    writeln!(html, "<title>Audio converter</title>")?;
    writeln!(html, "<style>{}</style>\n</head>\n<body>", STYLE)?;
    writeln!(html, "<div class=\"container\">")?;
    writeln!(html, "<h2>Convert an audio file</h2>")?;
    writeln!(
        html,
        "<form id=\"convert\" method=\"post\" enctype=\"multipart/form-data\">"
    )?;

    writeln!(
        html,
        "<p><input type=\"file\" id=\"input-file\" name=\"{}\" accept=\"{}\" required></p>",
        FILE_FIELD,
        registry.accepted_extensions().join(",")
    )?;
    write_limits(html, registry, config)?;

    writeln!(html, "<p>Output format:")?;
    for format in registry.output_formats() {
        writeln!(
            html,
            "<label><input type=\"radio\" name=\"{}\" value=\"{}\" required> {}</label>",
            FORMAT_FIELD, format.name, format.name
        )?;
    }
    writeln!(html, "</p>")?;

    for format in registry.output_formats() {
        write_options(html, format)?;
    }

    writeln!(html, "<p><input type=\"submit\" value=\"Convert\"></p>")?;
    writeln!(html, "</form>\n</div>")?;
    writeln!(html, "<script>{}</script>", SCRIPT)?;
    writeln!(html, "</body>\n</html>")
}

fn write_limits(html: &mut String, registry: &FormatRegistry, config: &ServerConfig) -> std::fmt::Result {
    let limits: Vec<String> = registry
        .formats()
        .iter()
        .filter(|f| f.can_decode())
        .filter_map(|f| {
            config
                .upload_limit(f)
                .map(|limit| format!("{} {}", f.name, human_size(limit)))
        })
        .collect();

    if !limits.is_empty() {
        writeln!(
            html,
            "<p class=\"limits\">Maximum upload size: {}</p>",
            limits.join(", ")
        )?;
    }
    Ok(())
}

fn write_options(html: &mut String, format: &Format) -> std::fmt::Result {
    writeln!(
        html,
        "<div class=\"output-options\" id=\"{}-options\">",
        format.name
    )?;
    for spec in format.params {
        write_field(html, spec)?;
    }
    writeln!(html, "</div>")
}

fn write_field(html: &mut String, spec: &ParamSpec) -> std::fmt::Result {
    match spec.constraint {
        Constraint::OneOf(values) => {
            writeln!(html, "<p><label>{} <select name=\"{}\">", spec.label, spec.key)?;
            for value in values {
                writeln!(
                    html,
                    "<option value=\"{}\">{}</option>",
                    value,
                    option_label(spec, *value)
                )?;
            }
            writeln!(html, "</select></label></p>")
        }
        Constraint::Range { min, max } => writeln!(
            html,
            "<p><label>{} <input type=\"number\" name=\"{}\" min=\"{}\" max=\"{}\"></label></p>",
            spec.label, spec.key, min, max
        ),
        Constraint::Tokens(tokens) => {
            writeln!(html, "<p><label>{} <select name=\"{}\">", spec.label, spec.key)?;
            for token in tokens {
                writeln!(html, "<option value=\"{}\">{}</option>", token, token)?;
            }
            writeln!(html, "</select></label></p>")
        }
        Constraint::Flag => writeln!(
            html,
            "<p><label><input type=\"checkbox\" name=\"{}\" value=\"true\"> {}</label></p>",
            spec.key, spec.label
        ),
    }
}

fn option_label(spec: &ParamSpec, value: i64) -> String {
    if spec.key == MP3_CHANNEL_MODE.key {
        if let Some(mode) = ChannelMode::from_lame(value) {
            return mode.label().to_string();
        }
    }
    value.to_string()
}

fn human_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MiB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{} KiB", bytes / KIB)
    } else {
        format!("{} bytes", bytes)
    }
}
