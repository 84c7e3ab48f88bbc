//! Per-message DEFLATE (RFC 7692)
//!
//! Compression runs raw deflate with a sync flush and strips the trailing
//! `0x00 0x00 0xff 0xff`; decompression appends those four bytes back
//! before inflating. Context takeover keeps the sliding window across
//! messages on one side of the connection unless the corresponding
//! `*_no_context_takeover` parameter was negotiated.

use crate::error::{PayloadError, Result};
use crate::frame::Role;
use crate::protocol::extension::*;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// The sync-flush trailer stripped from compressed payloads and appended
/// before inflating (RFC 7692 section 7.2.1)
const SYNC_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Negotiated permessage-deflate parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateConfig {
    /// Server resets its compression window after every message
    pub server_no_context_takeover: bool,
    /// Client resets its compression window after every message
    pub client_no_context_takeover: bool,
    /// Maximum LZ77 window the server may compress with (8..=15)
    pub server_max_window_bits: u8,
    /// Maximum LZ77 window the client may compress with (8..=15)
    pub client_max_window_bits: u8,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: 15,
            client_max_window_bits: 15,
        }
    }
}

impl DeflateConfig {
    /// Parse a `Sec-WebSocket-Extensions` value. Returns `None` when the
    /// header does not offer permessage-deflate or carries parameters we
    /// cannot honor (the extension is then treated as not negotiated).
    pub fn parse(header: &str) -> Option<Self> {
        // The header may list several extensions; take the deflate offer.
        let offer = header
            .split(',')
            .map(str::trim)
            .find(|ext| {
                ext.split(';')
                    .next()
                    .map(|name| name.trim().eq_ignore_ascii_case(PERMESSAGE_DEFLATE))
                    .unwrap_or(false)
            })?;

        let mut config = Self::default();
        for param in offer.split(';').skip(1) {
            let param = param.trim();
            let (name, value) = match param.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (param, None),
            };

            match name {
                SERVER_NO_CONTEXT_TAKEOVER => config.server_no_context_takeover = true,
                CLIENT_NO_CONTEXT_TAKEOVER => config.client_no_context_takeover = true,
                SERVER_MAX_WINDOW_BITS => {
                    config.server_max_window_bits = parse_window_bits(value)?;
                }
                // A bare client_max_window_bits in an offer only signals
                // that the client can accept the parameter.
                CLIENT_MAX_WINDOW_BITS => {
                    if let Some(value) = value {
                        config.client_max_window_bits = parse_window_bits(Some(value))?;
                    }
                }
                _ => return None,
            }
        }
        Some(config)
    }

    /// Render the extension value for the handshake header, reflecting the
    /// negotiated parameters.
    pub fn header_value(&self) -> String {
        let mut value = String::from(PERMESSAGE_DEFLATE);
        if self.server_no_context_takeover {
            value.push_str("; ");
            value.push_str(SERVER_NO_CONTEXT_TAKEOVER);
        }
        if self.client_no_context_takeover {
            value.push_str("; ");
            value.push_str(CLIENT_NO_CONTEXT_TAKEOVER);
        }
        if self.server_max_window_bits < 15 {
            value.push_str(&format!("; {}={}", SERVER_MAX_WINDOW_BITS, self.server_max_window_bits));
        }
        if self.client_max_window_bits < 15 {
            value.push_str(&format!("; {}={}", CLIENT_MAX_WINDOW_BITS, self.client_max_window_bits));
        }
        value
    }
}

fn parse_window_bits(value: Option<&str>) -> Option<u8> {
    let bits: u8 = value?.parse().ok()?;
    (8..=15).contains(&bits).then_some(bits)
}

/// Deflate context for outgoing messages
pub struct Compressor {
    ctx: Compress,
    reset_context: bool,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("reset_context", &self.reset_context)
            .finish_non_exhaustive()
    }
}

impl Compressor {
    /// Compressor for this endpoint's role under the negotiated config
    pub fn for_role(config: &DeflateConfig, role: Role) -> Self {
        let reset_context = match role {
            Role::Client => config.client_no_context_takeover,
            Role::Server => config.server_no_context_takeover,
        };
        Self {
            ctx: Compress::new(Compression::default(), false),
            reset_context,
        }
    }

    /// Compress one message payload, stripping the sync-flush trailer.
    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len() / 2 + 64);

        let start_in = self.ctx.total_in();
        while ((self.ctx.total_in() - start_in) as usize) < input.len() {
            let consumed = (self.ctx.total_in() - start_in) as usize;
            output.reserve(1024);
            self.ctx
                .compress_vec(&input[consumed..], &mut output, FlushCompress::None)
                .map_err(|e| PayloadError::Compression(e.to_string()))?;
        }

        // Sync-flush until the trailer appears, then drop it.
        while !output.ends_with(&SYNC_TRAILER) {
            output.reserve(64);
            self.ctx
                .compress_vec(&[], &mut output, FlushCompress::Sync)
                .map_err(|e| PayloadError::Compression(e.to_string()))?;
        }
        output.truncate(output.len() - SYNC_TRAILER.len());

        if self.reset_context {
            self.ctx.reset();
        }
        Ok(output)
    }
}

/// Inflate context for incoming messages
pub struct Decompressor {
    ctx: Decompress,
    reset_context: bool,
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decompressor")
            .field("reset_context", &self.reset_context)
            .finish_non_exhaustive()
    }
}

impl Decompressor {
    /// Decompressor for this endpoint's role under the negotiated config
    pub fn for_role(config: &DeflateConfig, role: Role) -> Self {
        // We inflate what the peer compressed, so the flags cross over.
        let reset_context = match role {
            Role::Client => config.server_no_context_takeover,
            Role::Server => config.client_no_context_takeover,
        };
        Self {
            ctx: Decompress::new(false),
            reset_context,
        }
    }

    /// Inflate one message payload after appending the sync-flush trailer.
    ///
    /// `max_size` bounds the inflated output so a small compressed frame
    /// cannot balloon without limit.
    pub fn decompress(&mut self, input: &[u8], max_size: usize) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len() * 2 + 64);

        for chunk in [input, &SYNC_TRAILER[..]] {
            let start_in = self.ctx.total_in();
            loop {
                let consumed = (self.ctx.total_in() - start_in) as usize;
                if consumed >= chunk.len() {
                    break;
                }
                if output.len() > max_size {
                    return Err(PayloadError::MessageTooLarge { max: max_size }.into());
                }
                output.reserve(4096);
                let before_out = output.len();
                let status = self
                    .ctx
                    .decompress_vec(&chunk[consumed..], &mut output, FlushDecompress::Sync)
                    .map_err(|e| PayloadError::Decompression(e.to_string()))?;
                let after_consumed = (self.ctx.total_in() - start_in) as usize;
                match status {
                    Status::StreamEnd => break,
                    Status::Ok | Status::BufError => {
                        if after_consumed == consumed && output.len() == before_out {
                            return Err(PayloadError::Decompression(
                                "corrupt deflate stream: no progress".to_string(),
                            )
                            .into());
                        }
                    }
                }
            }
        }

        if self.reset_context {
            self.ctx.reset(false);
        }
        Ok(output)
    }
}
