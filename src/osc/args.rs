//! Positional argument accessors
//!
//! The remote side is loose about numeric types (a volume may arrive as an
//! int 0 or a float 0.0), so numeric accessors coerce between OSC number
//! types. Anything else yields `None` and the caller drops the message.

use rosc::OscType;

pub fn int_at(args: &[OscType], index: usize) -> Option<i64> {
    match args.get(index)? {
        OscType::Int(v) => Some(*v as i64),
        OscType::Long(v) => Some(*v),
        OscType::Float(v) if v.fract() == 0.0 => Some(*v as i64),
        OscType::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        OscType::Bool(v) => Some(*v as i64),
        _ => None,
    }
}

/// Non-negative integer, used for track and scene ids
pub fn index_at(args: &[OscType], index: usize) -> Option<usize> {
    int_at(args, index).and_then(|v| usize::try_from(v).ok())
}

pub fn float_at(args: &[OscType], index: usize) -> Option<f64> {
    match args.get(index)? {
        OscType::Float(v) => Some(*v as f64),
        OscType::Double(v) => Some(*v),
        OscType::Int(v) => Some(*v as f64),
        OscType::Long(v) => Some(*v as f64),
        _ => None,
    }
}

pub fn bool_at(args: &[OscType], index: usize) -> Option<bool> {
    match args.get(index)? {
        OscType::Bool(v) => Some(*v),
        OscType::Int(v) => Some(*v != 0),
        OscType::Long(v) => Some(*v != 0),
        OscType::Float(v) => Some(*v != 0.0),
        OscType::Double(v) => Some(*v != 0.0),
        _ => None,
    }
}

pub fn string_at(args: &[OscType], index: usize) -> Option<&str> {
    match args.get(index)? {
        OscType::String(s) => Some(s.as_str()),
        _ => None,
    }
}

/// Booleans travel as int 1/0 on the wire
pub fn flag(value: bool) -> OscType {
    OscType::Int(value as i32)
}
