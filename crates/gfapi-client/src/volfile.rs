//! Volume specification files.
//!
//! A volfile describes the translator graph used to reach a volume:
//!
//! ```text
//! # comment
//! volume patchy-client-0
//!     type protocol/client
//!     option remote-host server1
//!     option remote-subvolume /bricks/b0
//! end-volume
//!
//! volume patchy-dht
//!     type cluster/distribute
//!     subvolumes patchy-client-0 patchy-client-1
//! end-volume
//! ```
//!
//! Subvolumes must be defined before they are referenced. The last stanza is
//! the top of the graph.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{ClientError, Result};

/// One `volume ... end-volume` stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translator {
    /// Stanza name, unique within the volfile.
    pub name: String,
    /// Translator type, e.g. `protocol/client`.
    pub kind: String,
    /// `option` lines; a repeated key keeps the last value.
    pub options: BTreeMap<String, String>,
    /// Children, in the order listed.
    pub subvolumes: Vec<String>,
}

impl Translator {
    /// Value of option `key`.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// A brick reached through a `protocol/client` translator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Brick {
    /// Client translator that reaches the brick.
    pub translator: String,
    /// `remote-host`.
    pub host: String,
    /// `remote-subvolume`.
    pub path: String,
    /// `transport-type`, `socket` when unset.
    pub transport: String,
}

/// Parsed translator graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volfile {
    translators: Vec<Translator>,
}

struct Stanza {
    line: usize,
    name: String,
    kind: Option<String>,
    options: BTreeMap<String, String>,
    subvolumes: Vec<String>,
}

fn parse_error(line: usize, msg: impl std::fmt::Display) -> ClientError {
    ClientError::config(format!("volfile line {}: {}", line, msg))
}

impl Volfile {
    /// Parses volfile text. Errors name the offending line.
    pub fn parse(text: &str) -> Result<Self> {
        let mut translators: Vec<Translator> = Vec::new();
        let mut defined: HashSet<String> = HashSet::new();
        let mut current: Option<Stanza> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let mut words = line.split_whitespace();
            let directive = words.next().unwrap_or_default();
            let rest: Vec<&str> = words.collect();

            match directive {
                "volume" => {
                    if let Some(open) = &current {
                        return Err(parse_error(
                            line_no,
                            format!(
                                "volume {} opened before {} was closed",
                                rest.first().copied().unwrap_or_default(),
                                open.name
                            ),
                        ));
                    }
                    let [name] = rest.as_slice() else {
                        return Err(parse_error(line_no, "expected `volume <name>`"));
                    };
                    if defined.contains(*name) {
                        return Err(parse_error(line_no, format!("duplicate volume {}", name)));
                    }
                    current = Some(Stanza {
                        line: line_no,
                        name: name.to_string(),
                        kind: None,
                        options: BTreeMap::new(),
                        subvolumes: Vec::new(),
                    });
                }
                "type" => {
                    let stanza = current
                        .as_mut()
                        .ok_or_else(|| parse_error(line_no, "`type` outside a volume"))?;
                    let [kind] = rest.as_slice() else {
                        return Err(parse_error(line_no, "expected `type <kind>`"));
                    };
                    stanza.kind = Some(kind.to_string());
                }
                "option" => {
                    let stanza = current
                        .as_mut()
                        .ok_or_else(|| parse_error(line_no, "`option` outside a volume"))?;
                    if rest.len() < 2 {
                        return Err(parse_error(line_no, "expected `option <key> <value>`"));
                    }
                    stanza
                        .options
                        .insert(rest[0].to_string(), rest[1..].join(" "));
                }
                "subvolumes" => {
                    let stanza = current
                        .as_mut()
                        .ok_or_else(|| parse_error(line_no, "`subvolumes` outside a volume"))?;
                    if rest.is_empty() {
                        return Err(parse_error(line_no, "`subvolumes` needs at least one name"));
                    }
                    for sub in rest {
                        if !defined.contains(sub) {
                            return Err(parse_error(
                                line_no,
                                format!("subvolume {} referenced before definition", sub),
                            ));
                        }
                        stanza.subvolumes.push(sub.to_string());
                    }
                }
                "end-volume" => {
                    let stanza = current
                        .take()
                        .ok_or_else(|| parse_error(line_no, "`end-volume` without `volume`"))?;
                    let kind = stanza.kind.ok_or_else(|| {
                        parse_error(stanza.line, format!("volume {} has no type", stanza.name))
                    })?;
                    defined.insert(stanza.name.clone());
                    translators.push(Translator {
                        name: stanza.name,
                        kind,
                        options: stanza.options,
                        subvolumes: stanza.subvolumes,
                    });
                }
                other => {
                    return Err(parse_error(line_no, format!("unknown directive {}", other)));
                }
            }
        }

        if let Some(open) = current {
            return Err(parse_error(
                open.line,
                format!("volume {} is missing end-volume", open.name),
            ));
        }
        if translators.is_empty() {
            return Err(ClientError::config("volfile defines no volumes"));
        }
        Ok(Self { translators })
    }

    /// Reads and parses a local volfile.
    pub fn load(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| {
            ClientError::config(format!("volfile {}: {}", path.display(), e))
        })?;
        if !meta.is_file() {
            return Err(ClientError::config(format!(
                "volfile {} is not a regular file",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClientError::config(format!("volfile {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "loading volume file");
        Self::parse(&text)
    }

    /// Translators in definition order.
    pub fn translators(&self) -> &[Translator] {
        &self.translators
    }

    /// Translator called `name`.
    pub fn get(&self, name: &str) -> Option<&Translator> {
        self.translators.iter().find(|t| t.name == name)
    }

    /// Top of the graph: the last translator defined.
    pub fn top(&self) -> &Translator {
        // parse() rejects empty graphs
        &self.translators[self.translators.len() - 1]
    }

    /// Bricks of every `protocol/client` translator.
    pub fn bricks(&self) -> Vec<Brick> {
        self.translators
            .iter()
            .filter(|t| t.kind == "protocol/client")
            .map(|t| Brick {
                translator: t.name.clone(),
                host: t.option("remote-host").unwrap_or_default().to_string(),
                path: t.option("remote-subvolume").unwrap_or_default().to_string(),
                transport: t
                    .option("transport-type")
                    .unwrap_or("socket")
                    .to_string(),
            })
            .collect()
    }

    /// Renders the graph as an indented tree rooted at the top translator.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        self.render_node(self.top(), 0, &mut out);
        out
    }

    fn render_node(&self, xl: &Translator, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{} ({})\n", xl.name, xl.kind));
        for sub in &xl.subvolumes {
            if let Some(child) = self.get(sub) {
                self.render_node(child, depth + 1, out);
            }
        }
    }
}

/// A volume resolved to its translator graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeTopology {
    /// Volume name the graph was resolved for.
    pub volume_id: String,
    /// The resolved graph.
    pub volfile: Volfile,
}

impl VolumeTopology {
    /// Pairs a volume name with its graph.
    pub fn new(volume_id: impl Into<String>, volfile: Volfile) -> Self {
        Self {
            volume_id: volume_id.into(),
            volfile,
        }
    }

    /// Bricks of the graph.
    pub fn bricks(&self) -> Vec<Brick> {
        self.volfile.bricks()
    }
}
