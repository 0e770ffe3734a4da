use async_trait::async_trait;
use roundtable_core::HumanInput;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};

/// Reads the human's turns line by line from stdin.
pub struct StdinInput {
    reader: BufReader<Stdin>,
    stdout: Stdout,
}

impl StdinInput {
    /// Creates an input reading from the process's stdin.
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(io::stdin()),
            stdout: io::stdout(),
        }
    }
}

impl Default for StdinInput {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HumanInput for StdinInput {
    async fn read_input(&mut self, prompt: &str) -> std::io::Result<Option<String>> {
        self.stdout.write_all(prompt.as_bytes()).await?;
        self.stdout.flush().await?;

        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
    }
}
