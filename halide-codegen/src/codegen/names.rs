//! Identifier scheme for generated code.
//!
//! Every name a backend prints is derived here from a node's symbol, so
//! lowering and rendering agree without sharing any formatting code.

/// Target identifier for a uid or display name.
///
/// Characters outside `[A-Za-z0-9_]` become `_`; a leading digit gets a `_` prefix.
pub fn ident(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Private storage member of a leaf value: `m_{symbol}`.
pub fn storage(symbol: &str) -> String {
    format!("m_{symbol}")
}

/// Scale step member of a quantized leaf: `m_step_{symbol}`.
pub fn step(symbol: &str) -> String {
    format!("m_step_{symbol}")
}

/// Buffer view over a leaf's storage: `b_{symbol}`.
pub fn buffer(symbol: &str) -> String {
    format!("b_{symbol}")
}

/// Dequantized stage of a quantized leaf: `f_{symbol}`.
pub fn view_func(symbol: &str) -> String {
    format!("f_{symbol}")
}

/// Scale stage of a quantized leaf: `f_step_{symbol}`.
pub fn step_func(symbol: &str) -> String {
    format!("f_step_{symbol}")
}

pub fn getter(symbol: &str) -> String {
    format!("get_{}", symbol.to_lowercase())
}

pub fn setter(symbol: &str) -> String {
    format!("set_{}", symbol.to_lowercase())
}

/// History buffers of a recurrent input: `m_buffer{name}`.
pub fn history(name: &str) -> String {
    format!("m_buffer{name}")
}

/// Parameter bound to the current history slot: `m_{name}`.
pub fn history_param(name: &str) -> String {
    format!("m_{name}")
}
