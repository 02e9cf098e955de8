//! Panel command encoders
//!
//! Each command renders to one ASCII line without the terminator; the serial
//! link appends `\n` when sending.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Commands understood by the panel firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PanelCommand {
    /// `!LCC=<lcd>`
    Clear { lcd: u8 },
    /// `!LCB=<lcd>,<0|1>`
    Backlight { lcd: u8, on: bool },
    /// `!LC=<lcd>,<row>,<col>,<message>`; the message runs to the end of the line
    Message {
        lcd: u8,
        row: u8,
        col: u8,
        text: String,
    },
    /// `!S=<servo>,<percent>`, percent clamped to 0..=100
    Servo { servo: u8, percent: u8 },
}

impl fmt::Display for PanelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelCommand::Clear { lcd } => write!(f, "!LCC={}", lcd),
            PanelCommand::Backlight { lcd, on } => {
                write!(f, "!LCB={},{}", lcd, if *on { 1 } else { 0 })
            }
            PanelCommand::Message {
                lcd,
                row,
                col,
                text,
            } => {
                // A newline would end the command early on the wire
                let text = text.replace(['\r', '\n'], " ");
                write!(f, "!LC={},{},{},{}", lcd, row, col, text)
            }
            PanelCommand::Servo { servo, percent } => {
                write!(f, "!S={},{}", servo, (*percent).min(100))
            }
        }
    }
}
