//! Command parsing, routing and execution.

mod blocking;
mod connection_cmds;
mod executor;
mod hashes;
mod json_cmds;
mod keys;
mod lists;
mod registry;
mod sets;
mod sorted_sets;
mod streams;
mod strings;
mod transactions;

pub use executor::CommandExecutor;
pub use registry::{Command, CommandRegistry};
pub(crate) use strings::format_float;

use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use bytes::Bytes;

/// Parsed command with an uppercase name and its arguments.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    /// Command name (uppercase)
    pub name: String,
    /// Command arguments
    pub args: Vec<Bytes>,
}

impl ParsedCommand {
    /// Parse a command from a RESP frame (an array of bulk strings).
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let frames = match frame {
            Frame::Array(arr) if !arr.is_empty() => arr,
            _ => return Err(CommandError::SyntaxError.into()),
        };

        let mut iter = frames.into_iter();
        let name_frame = iter.next().ok_or(CommandError::SyntaxError)?;
        let name_bytes = name_frame.to_bytes().ok_or(CommandError::SyntaxError)?;
        let name = std::str::from_utf8(&name_bytes)
            .map_err(|_| CommandError::SyntaxError)?
            .to_uppercase();

        let args: Vec<Bytes> = iter.map(|f| f.to_bytes().unwrap_or_default()).collect();

        Ok(Self { name, args })
    }

    /// Build a command directly from name and args (AOF replay, EXEC).
    pub fn from_parts(name: String, args: Vec<Bytes>) -> Self {
        Self {
            name: name.to_uppercase(),
            args,
        }
    }

    /// Number of arguments (excluding the command name).
    #[inline]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// An argument as a string slice.
    pub fn get_str(&self, index: usize) -> Result<&str> {
        let bytes = self
            .args
            .get(index)
            .ok_or_else(|| CommandError::WrongArity {
                command: self.name.clone(),
            })?;
        std::str::from_utf8(bytes).map_err(|_| CommandError::SyntaxError.into())
    }

    /// An argument as an i64.
    pub fn get_i64(&self, index: usize) -> Result<i64> {
        self.get_str(index)?
            .parse()
            .map_err(|_| CommandError::NotInteger.into())
    }

    /// An argument as a u64.
    pub fn get_u64(&self, index: usize) -> Result<u64> {
        self.get_str(index)?
            .parse()
            .map_err(|_| CommandError::NotInteger.into())
    }

    /// An argument as an f64. NaN is rejected.
    pub fn get_f64(&self, index: usize) -> Result<f64> {
        let value: f64 = self
            .get_str(index)?
            .parse()
            .map_err(|_| CommandError::NotFloat)?;
        if value.is_nan() {
            return Err(CommandError::NotFloat.into());
        }
        Ok(value)
    }

    /// Require at least `min` arguments.
    pub fn require_args(&self, min: usize) -> Result<()> {
        if self.args.len() < min {
            return Err(CommandError::WrongArity {
                command: self.name.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Require exactly `count` arguments.
    pub fn require_exact_args(&self, count: usize) -> Result<()> {
        if self.args.len() != count {
            return Err(CommandError::WrongArity {
                command: self.name.clone(),
            }
            .into());
        }
        Ok(())
    }
}

bitflags::bitflags! {
    /// Command behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandFlags: u8 {
        /// Command is read-only
        const READONLY = 1 << 0;
        /// Command modifies data and is logged to the AOF
        const WRITE    = 1 << 1;
        /// Command may suspend waiting for data
        const BLOCKING = 1 << 2;
        /// Command uses no keys
        const NO_KEYS  = 1 << 3;
    }
}

impl CommandFlags {
    /// Flags for read-only commands.
    #[inline]
    pub const fn readonly() -> Self {
        Self::READONLY
    }

    /// Flags for write commands.
    #[inline]
    pub const fn write() -> Self {
        Self::WRITE
    }

    /// Flags for blocking commands.
    #[inline]
    pub const fn blocking() -> Self {
        Self::READONLY.union(Self::BLOCKING)
    }

    /// Flags for commands that take no keys.
    #[inline]
    pub const fn no_keys() -> Self {
        Self::READONLY.union(Self::NO_KEYS)
    }

    /// Is this a write command (and hence AOF-logged)?
    #[inline]
    pub fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    /// May this command suspend?
    #[inline]
    pub fn is_blocking(self) -> bool {
        self.contains(Self::BLOCKING)
    }
}
