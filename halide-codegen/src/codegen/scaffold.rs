//! Namespace and class scaffolding for generated C++.

use std::fmt;

pub(super) fn push_line(out: &mut String, indent: usize, line: &str) {
    push_block(out, indent, line);
}

/// Append `block` re-indented to `indent` levels, dropping its common leading whitespace.
pub(super) fn push_block(out: &mut String, indent: usize, block: &str) {
    if block.is_empty() {
        return;
    }
    let pad = "    ".repeat(indent);
    let mut lines: Vec<&str> = block.split('\n').collect();
    if matches!(lines.first(), Some(line) if line.trim().is_empty()) {
        lines.remove(0);
    }
    if matches!(lines.last(), Some(line) if line.trim().is_empty()) {
        lines.pop();
    }

    let min_indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.chars().take_while(|c| *c == ' ').count())
        .min()
        .unwrap_or(0);

    for line in lines {
        let trimmed = line.get(min_indent..).unwrap_or("").trim_end();
        if trimmed.is_empty() {
            out.push('\n');
            continue;
        }
        out.push_str(&pad);
        out.push_str(trimmed);
        out.push('\n');
    }
}

pub(super) fn escape_c_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

/// `class <name> final` with public members first, private members after.
pub(super) struct CppClass {
    name: String,
    public: Vec<String>,
    private: Vec<String>,
}

impl CppClass {
    pub(super) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            public: Vec::new(),
            private: Vec::new(),
        }
    }

    pub(super) fn add_public(&mut self, member: String) {
        self.public.push(member);
    }

    pub(super) fn add_private(&mut self, member: String) {
        self.private.push(member);
    }
}

impl fmt::Display for CppClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        push_line(&mut out, 0, &format!("class {} final", self.name));
        push_line(&mut out, 0, "{");
        for (label, members) in [("public:", &self.public), ("private:", &self.private)] {
            if members.is_empty() {
                continue;
            }
            push_line(&mut out, 0, label);
            for member in members {
                push_block(&mut out, 1, member);
            }
        }
        push_line(&mut out, 0, "};");
        f.write_str(&out)
    }
}

pub(super) struct CppNamespace {
    name: String,
    members: Vec<String>,
}

impl CppNamespace {
    pub(super) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Vec::new(),
        }
    }

    pub(super) fn add_member(&mut self, member: String) {
        self.members.push(member);
    }
}

impl fmt::Display for CppNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        push_line(&mut out, 0, &format!("namespace {}", self.name));
        push_line(&mut out, 0, "{");
        for member in &self.members {
            push_block(&mut out, 0, member);
        }
        push_line(&mut out, 0, "}");
        f.write_str(&out)
    }
}
