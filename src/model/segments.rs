// src/model/segments.rs

//! Hierarchical labels identifying named tasks.
//!
//! A named task carries a non-empty sequence of segments: plain labels
//! (`foo.bar`) and cross-axis values (`foo.bar[2.13,jvm]`). Segments render
//! to both a display string and a filesystem path; cross values are
//! flattened as sibling path components.

use std::fmt;

/// One element of a segment path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Label(String),
    Cross(Vec<String>),
}

/// Non-empty ordered sequence of [`Segment`]s.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segments(Vec<Segment>);

impl Segments {
    /// Build a segment path from plain labels.
    pub fn labels<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Segments(parts.into_iter().map(|p| Segment::Label(p.into())).collect())
    }

    /// Parse a dotted label path, e.g. `"core.compile"`.
    pub fn parse(path: &str) -> Self {
        Segments::labels(path.split('.').map(str::to_string))
    }

    pub fn from_parts(parts: Vec<Segment>) -> Self {
        Segments(parts)
    }

    pub fn parts(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This path preceded by `prefix`.
    pub fn prefixed(&self, prefix: &Segments) -> Segments {
        let mut parts = prefix.0.clone();
        parts.extend(self.0.iter().cloned());
        Segments(parts)
    }

    /// This path followed by an extra label.
    pub fn with_label(&self, label: &str) -> Segments {
        let mut parts = self.0.clone();
        parts.push(Segment::Label(label.to_string()));
        Segments(parts)
    }

    /// This path followed by every label of `suffix`.
    pub fn with_suffix(&self, suffix: &Segments) -> Segments {
        let mut parts = self.0.clone();
        parts.extend(suffix.0.iter().cloned());
        Segments(parts)
    }

    /// Display rendering: labels joined by dots, cross values bracketed.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for part in &self.0 {
            match part {
                Segment::Label(l) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(l);
                }
                Segment::Cross(vs) => {
                    out.push('[');
                    out.push_str(&vs.join(","));
                    out.push(']');
                }
            }
        }
        out
    }

    /// Filesystem rendering: one component per label, cross values
    /// flattened as sibling components.
    pub fn path_components(&self) -> Vec<String> {
        let mut out = Vec::new();
        for part in &self.0 {
            match part {
                Segment::Label(l) => out.push(l.clone()),
                Segment::Cross(vs) => out.extend(vs.iter().cloned()),
            }
        }
        out
    }
}

impl fmt::Display for Segments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
