use crate::error::ScanError;
use std::io::{Cursor, SeekFrom};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeek, AsyncSeekExt, BufReader};

/// Anything the symbol source can read lines from and rewind.
pub trait SymbolStream: AsyncBufRead + AsyncSeek + Unpin + Send {}

impl<T: AsyncBufRead + AsyncSeek + Unpin + Send> SymbolStream for T {}

/// Endless, cycling reader over a list of base-asset names, one per line.
///
/// The underlying handle stays open for the life of the source and is
/// rewound when it reaches end-of-file.
pub struct SymbolSource {
    reader: Box<dyn SymbolStream>,
    quote_currency: String,
    line: String,
    passes: u64,
}

impl SymbolSource {
    pub async fn open<P: AsRef<Path>>(path: P, quote_currency: &str) -> Result<Self, ScanError> {
        let file = File::open(path).await?;
        Ok(Self::from_reader(BufReader::new(file), quote_currency))
    }

    pub fn from_symbols<S: AsRef<str>>(symbols: &[S], quote_currency: &str) -> Self {
        let text = symbols
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join("\n");
        Self::from_reader(Cursor::new(text.into_bytes()), quote_currency)
    }

    pub fn from_reader<R: SymbolStream + 'static>(reader: R, quote_currency: &str) -> Self {
        Self {
            reader: Box::new(reader),
            quote_currency: quote_currency.trim().to_ascii_uppercase(),
            line: String::new(),
            passes: 0,
        }
    }

    /// Completed passes over the list.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn quote_currency(&self) -> &str {
        &self.quote_currency
    }

    /// Next base asset, wrapping to the start of the list at end-of-file.
    ///
    /// Blank lines and the quote currency itself are skipped.
    pub async fn next_symbol(&mut self) -> Result<String, ScanError> {
        let mut rewinds = 0;

        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line).await?;

            if read == 0 {
                // A whole pass from the first line produced nothing.
                if rewinds > 0 {
                    return Err(ScanError::EmptySymbolList);
                }
                rewinds += 1;
                self.passes += 1;
                self.reset().await?;
                continue;
            }

            let symbol = self.line.trim().to_ascii_uppercase();
            if symbol.is_empty() || symbol == self.quote_currency {
                continue;
            }
            return Ok(symbol);
        }
    }

    /// Rewind to the first line.
    pub async fn reset(&mut self) -> Result<(), ScanError> {
        self.reader.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }

    /// Trading pair for a base asset, e.g. `BNB` → `BNBETH`.
    pub fn pair(&self, base: &str) -> String {
        format!("{}{}", base, self.quote_currency)
    }
}
