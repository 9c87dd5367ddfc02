//! The per-directory journal: in-memory log commands, their self-closing
//! XML-like wire encoding, and the buffer that accumulates them before a flush.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{EditorError, Result};

/// One journaled mutation command. Every field an editor might need to pass along is
/// carried as a named attribute so the wire form stays a flat, self-closing tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCommand {
    /// Update fields on an entries-table row.
    ModifyEntry {
        /// Entry name (`""` for "this directory").
        name: String,
        /// Field name -> new value.
        fields: BTreeMap<String, String>,
    },
    /// Set one working-copy-only property.
    ModifyWcProp {
        /// Entry name the wc-prop belongs to.
        name: String,
        /// The wc-prop name.
        propname: String,
        /// The new value, or absent to delete it.
        value: Option<String>,
    },
    /// Remove an entry from the entries table.
    DeleteEntry {
        /// Entry name to remove.
        name: String,
    },
    /// Three-way merge the working file against (left, right) text-bases.
    Merge {
        /// The working file's entry name.
        name: String,
        /// Path to the pre-update text-base ("mine"'s ancestor).
        left: String,
        /// Path to the freshly-applied text-base.
        right: String,
        /// Label for the left side in conflict markers.
        left_label: String,
        /// Label for the right side in conflict markers.
        right_label: String,
    },
    /// Copy `src` to `dst`, applying keyword/EOL translation on the way.
    CpAndTranslate {
        /// Source path (typically a text-base).
        src: String,
        /// Destination path (typically the working file).
        dst: String,
    },
    /// Copy `src` to `dst`, reversing keyword/EOL translation (contract-translate).
    CpAndDetranslate {
        /// Source path (typically the working file).
        src: String,
        /// Destination path (typically a scratch file).
        dst: String,
    },
    /// Rename `src` to `dst`.
    Mv {
        /// Source path.
        src: String,
        /// Destination path.
        dst: String,
    },
    /// Mark `path` read-only.
    Readonly {
        /// The path to chmod.
        path: String,
    },
    /// Set `path`'s mtime. `None` means "now".
    SetTimestamp {
        /// The path whose mtime to stamp.
        path: String,
        /// An explicit timestamp string, or `None` for "now".
        timestamp: Option<String>,
    },
}

impl LogCommand {
    /// The wire-level tag name for this command.
    pub fn tag(&self) -> &'static str {
        match self {
            LogCommand::ModifyEntry { .. } => "modify-entry",
            LogCommand::ModifyWcProp { .. } => "modify-wcprop",
            LogCommand::DeleteEntry { .. } => "delete-entry",
            LogCommand::Merge { .. } => "merge",
            LogCommand::CpAndTranslate { .. } => "cp-and-translate",
            LogCommand::CpAndDetranslate { .. } => "cp-and-detranslate",
            LogCommand::Mv { .. } => "mv",
            LogCommand::Readonly { .. } => "readonly",
            LogCommand::SetTimestamp { .. } => "set-timestamp",
        }
    }

    /// Render as a self-closing tag, e.g. `<modify-entry name="foo" revision="4"/>`.
    pub fn to_wire(&self) -> String {
        let mut attrs: Vec<(String, String)> = Vec::new();
        match self {
            LogCommand::ModifyEntry { name, fields } => {
                attrs.push(("name".into(), name.clone()));
                for (k, v) in fields {
                    attrs.push((k.clone(), v.clone()));
                }
            }
            LogCommand::ModifyWcProp {
                name,
                propname,
                value,
            } => {
                attrs.push(("name".into(), name.clone()));
                attrs.push(("propname".into(), propname.clone()));
                if let Some(v) = value {
                    attrs.push(("value".into(), v.clone()));
                }
            }
            LogCommand::DeleteEntry { name } => attrs.push(("name".into(), name.clone())),
            LogCommand::Merge {
                name,
                left,
                right,
                left_label,
                right_label,
            } => {
                attrs.push(("name".into(), name.clone()));
                attrs.push(("left".into(), left.clone()));
                attrs.push(("right".into(), right.clone()));
                attrs.push(("left-label".into(), left_label.clone()));
                attrs.push(("right-label".into(), right_label.clone()));
            }
            LogCommand::CpAndTranslate { src, dst } | LogCommand::CpAndDetranslate { src, dst } => {
                attrs.push(("src".into(), src.clone()));
                attrs.push(("dst".into(), dst.clone()));
            }
            LogCommand::Mv { src, dst } => {
                attrs.push(("src".into(), src.clone()));
                attrs.push(("dst".into(), dst.clone()));
            }
            LogCommand::Readonly { path } => attrs.push(("path".into(), path.clone())),
            LogCommand::SetTimestamp { path, timestamp } => {
                attrs.push(("path".into(), path.clone()));
                if let Some(ts) = timestamp {
                    attrs.push(("timestamp".into(), ts.clone()));
                }
            }
        }
        let mut out = String::new();
        write!(out, "<{}", self.tag()).unwrap();
        for (k, v) in &attrs {
            write!(out, " {k}=\"{}\"", escape_attr(v)).unwrap();
        }
        out.push_str("/>\n");
        out
    }
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

fn unescape_attr(s: &str) -> String {
    s.replace("&quot;", "\"").replace("&amp;", "&")
}

/// Parse one line of wire-format log, e.g. `<mv src="a" dst="b"/>`.
pub fn parse_wire_line(line: &str) -> Result<Option<LogCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let line = line
        .strip_prefix('<')
        .and_then(|l| l.strip_suffix("/>"))
        .ok_or_else(|| malformed(line))?;
    let mut parts = line.splitn(2, char::is_whitespace);
    let tag = parts.next().ok_or_else(|| malformed(line))?;
    let rest = parts.next().unwrap_or("");
    let attrs = parse_attrs(rest)?;
    let get = |k: &str| attrs.get(k).cloned();
    let require = |k: &str| get(k).ok_or_else(|| malformed(line));

    let cmd = match tag {
        "modify-entry" => {
            let name = require("name")?;
            let mut fields = BTreeMap::new();
            for (k, v) in &attrs {
                if k != "name" {
                    fields.insert(k.clone(), v.clone());
                }
            }
            LogCommand::ModifyEntry { name, fields }
        }
        "modify-wcprop" => LogCommand::ModifyWcProp {
            name: require("name")?,
            propname: require("propname")?,
            value: get("value"),
        },
        "delete-entry" => LogCommand::DeleteEntry {
            name: require("name")?,
        },
        "merge" => LogCommand::Merge {
            name: require("name")?,
            left: require("left")?,
            right: require("right")?,
            left_label: require("left-label")?,
            right_label: require("right-label")?,
        },
        "cp-and-translate" => LogCommand::CpAndTranslate {
            src: require("src")?,
            dst: require("dst")?,
        },
        "cp-and-detranslate" => LogCommand::CpAndDetranslate {
            src: require("src")?,
            dst: require("dst")?,
        },
        "mv" => LogCommand::Mv {
            src: require("src")?,
            dst: require("dst")?,
        },
        "readonly" => LogCommand::Readonly {
            path: require("path")?,
        },
        "set-timestamp" => LogCommand::SetTimestamp {
            path: require("path")?,
            timestamp: get("timestamp"),
        },
        other => {
            return Err(EditorError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown log verb '{other}'"),
            )))
        }
    };
    Ok(Some(cmd))
}

fn malformed(line: &str) -> EditorError {
    EditorError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("malformed log line: {line}"),
    ))
}

fn parse_attrs(s: &str) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    let mut rest = s.trim();
    while !rest.is_empty() {
        let eq = rest.find('=').ok_or_else(|| malformed(s))?;
        let key = rest[..eq].trim().to_string();
        rest = rest[eq + 1..].trim_start();
        let quote = rest.chars().next().ok_or_else(|| malformed(s))?;
        if quote != '"' {
            return Err(malformed(s));
        }
        rest = &rest[1..];
        let end = rest.find('"').ok_or_else(|| malformed(s))?;
        let value = unescape_attr(&rest[..end]);
        rest = rest[end + 1..].trim_start();
        out.insert(key, value);
    }
    Ok(out)
}

/// An append-only sequence of log commands for a single directory, accumulated in
/// memory before being flushed to disk as a `.log` file.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    commands: Vec<LogCommand>,
}

impl LogBuffer {
    /// A fresh, empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one command.
    pub fn push(&mut self, cmd: LogCommand) {
        self.commands.push(cmd);
    }

    /// `true` if no commands have been accumulated.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The accumulated commands, in emission order.
    pub fn commands(&self) -> &[LogCommand] {
        &self.commands
    }

    /// Render the whole buffer as the textual log-file contents.
    pub fn to_wire(&self) -> String {
        self.commands.iter().map(LogCommand::to_wire).collect()
    }

    /// Parse a full log file's contents back into commands, in file order.
    pub fn parse(text: &str) -> Result<Vec<LogCommand>> {
        text.lines().filter_map(|l| parse_wire_line(l).transpose()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_modify_entry() {
        let mut fields = BTreeMap::new();
        fields.insert("revision".to_string(), "4".to_string());
        fields.insert("deleted".to_string(), "false".to_string());
        let cmd = LogCommand::ModifyEntry {
            name: "a.txt".into(),
            fields,
        };
        let wire = cmd.to_wire();
        let parsed = parse_wire_line(wire.trim()).unwrap().unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn round_trips_mv_and_readonly() {
        let mut buf = LogBuffer::new();
        buf.push(LogCommand::Mv {
            src: "tmp/a".into(),
            dst: "text-base/a".into(),
        });
        buf.push(LogCommand::Readonly {
            path: "text-base/a".into(),
        });
        let wire = buf.to_wire();
        let parsed = LogBuffer::parse(&wire).unwrap();
        assert_eq!(parsed, buf.commands);
    }

    #[test]
    fn escapes_quotes_in_attribute_values() {
        let cmd = LogCommand::ModifyWcProp {
            name: "f".into(),
            propname: "p".into(),
            value: Some("has \"quotes\" & ampersands".into()),
        };
        let wire = cmd.to_wire();
        let parsed = parse_wire_line(wire.trim()).unwrap().unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse_wire_line("<frobnicate foo=\"bar\"/>").is_err());
    }

    #[test]
    fn preserves_command_order() {
        let text = "<mv src=\"a\" dst=\"b\"/>\n<readonly path=\"b\"/>\n<delete-entry name=\"c\"/>\n";
        let parsed = LogBuffer::parse(text).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].tag(), "mv");
        assert_eq!(parsed[1].tag(), "readonly");
        assert_eq!(parsed[2].tag(), "delete-entry");
    }
}
