use std::fmt;

use crate::types::{DeviceKey, PresetMode};

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    TransportTimeout,
    InvalidResponse(String),
    Protocol(String),
    IdentificationFailed(DeviceKey),
    UnsupportedTransition { from: PresetMode, to: PresetMode },
    NoState(DeviceKey),
    UnknownDevice(DeviceKey),
    OutOfRange { what: &'static str, value: f64, min: f64, max: f64 },
    Config(String),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::TransportTimeout => write!(f, "request timed out"),
            Error::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
            Error::Protocol(msg) => write!(f, "gateway error: {msg}"),
            Error::IdentificationFailed(key) => {
                write!(f, "could not identify module ({key})")
            }
            Error::UnsupportedTransition { from, to } => {
                write!(f, "unsupported preset transition: {from} -> {to}")
            }
            Error::NoState(key) => write!(f, "no state received yet for {key}"),
            Error::UnknownDevice(key) => write!(f, "unknown device: {key}"),
            Error::OutOfRange { what, value, min, max } => {
                write!(f, "{what} out of range: {value} not in {min}..={max}")
            }
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::TransportTimeout
        } else if e.is_decode() {
            Error::InvalidResponse(e.to_string())
        } else {
            Error::Http(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidResponse(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
