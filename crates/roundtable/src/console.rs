use std::io::{self, Write};

use owo_colors::{OwoColorize, Style};
use roundtable_core::{Message, Role, TranscriptSink};

const BAR_CHAR: &str = "▎";

/// Prints every transcript entry to a terminal.
pub struct ConsoleSink<W> {
    out: W,
    colored: bool,
}

impl ConsoleSink<io::Stdout> {
    /// Creates a sink printing to stdout with colors.
    #[inline]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    /// Creates a sink printing to `out` with colors.
    #[inline]
    pub fn new(out: W) -> Self {
        Self { out, colored: true }
    }

    /// Turns colors on or off.
    #[inline]
    pub fn with_colors(mut self, colored: bool) -> Self {
        self.colored = colored;
        self
    }

    /// Returns the underlying writer.
    #[inline]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn style(&self, role: Role) -> Option<Style> {
        if !self.colored {
            return None;
        }
        Some(match role {
            Role::System => Style::new().dimmed(),
            Role::User => Style::new().bright_green(),
            Role::Assistant => Style::new().bright_cyan(),
            Role::ToolResult => Style::new().bright_yellow(),
        })
    }
}

impl<W: Write + Send> TranscriptSink for ConsoleSink<W> {
    fn record(&mut self, message: &Message) -> io::Result<()> {
        let style = ConsoleSink::<W>::style(self, message.role());
        let header = format!("---------- {} ----------", message.sender());
        let bar = match style {
            Some(style) => {
                writeln!(self.out, "{}", header.style(style))?;
                BAR_CHAR.style(style).to_string()
            }
            None => {
                writeln!(self.out, "{header}")?;
                BAR_CHAR.to_owned()
            }
        };
        for line in message.content().to_string().lines() {
            writeln!(self.out, "{bar}{line}")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
