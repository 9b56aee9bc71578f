//! Tag source capability and its Modbus TCP adapter.

use async_trait::async_trait;
use std::time::Duration;
use tokio_modbus::client::{Client, Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{DataKind, RegisterKind, SourceConfig, TagConfig};
use crate::error::ConnectionError;
use crate::telemetry::{Snapshot, TagValue};

/// A session-oriented source of current values for a fixed set of tags.
///
/// The registered tag set is fixed at startup; it is never discovered
/// dynamically. Session state changes only through explicit `connect` /
/// `disconnect` calls, never as a side effect of a read.
#[async_trait]
pub trait TagSource: Send {
    /// Establish the session. Failure is fatal: the caller aborts startup.
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Read every registered tag and return a full snapshot.
    ///
    /// Individual tag failures are logged and surface as
    /// [`TagValue::Absent`] entries; the call itself never fails, so one bad
    /// tag can never take down a whole cycle's read.
    async fn read_all(&mut self) -> Snapshot;

    /// Release the session. Idempotent; failures are logged, never returned.
    async fn disconnect(&mut self);
}

/// Error reading a single tag. Contained within `read_all`.
#[derive(Debug, thiserror::Error)]
enum ReadError {
    #[error("Read timed out")]
    Timeout,

    #[error("Read failed: {0}")]
    Transport(String),

    #[error("Modbus exception: {0}")]
    Exception(String),

    #[error("Short response: got {got} registers, needed {needed}")]
    ShortResponse { got: usize, needed: usize },
}

/// Tag source backed by a Modbus TCP device.
pub struct ModbusTagSource {
    config: SourceConfig,
    ctx: Option<Context>,
}

impl ModbusTagSource {
    pub fn new(config: SourceConfig) -> Self {
        Self { config, ctx: None }
    }
}

#[async_trait]
impl TagSource for ModbusTagSource {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let endpoint = self.config.endpoint();

        // Modbus TCP has no peer authentication to offer, so accepting the
        // unauthenticated session must be an explicit configuration choice.
        if !self.config.security.allow_unauthenticated {
            return Err(ConnectionError::new(
                &endpoint,
                "Modbus TCP offers no peer authentication; \
                 set source.security.allow_unauthenticated to accept this",
            ));
        }
        warn!(
            endpoint = %endpoint,
            "Connecting without peer authentication (explicitly enabled in configuration)"
        );

        let addr = tokio::net::lookup_host(endpoint.as_str())
            .await
            .map_err(|e| ConnectionError::new(&endpoint, e))?
            .next()
            .ok_or_else(|| ConnectionError::new(&endpoint, "Host resolved to no addresses"))?;

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let slave = Slave(self.config.unit_id);

        let ctx = tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
            .await
            .map_err(|_| ConnectionError::new(&endpoint, "Connection timeout"))?
            .map_err(|e| ConnectionError::new(&endpoint, e))?;

        info!(
            endpoint = %endpoint,
            unit = self.config.unit_id,
            tags = self.config.tags.len(),
            "Connected to Modbus device"
        );
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn read_all(&mut self) -> Snapshot {
        let Self { config, ctx } = self;
        let mut snapshot = Snapshot::with_capacity(config.tags.len());

        let Some(ctx) = ctx.as_mut() else {
            warn!("No active Modbus session; marking every tag absent");
            for tag in &config.tags {
                snapshot.insert(tag.id.clone(), TagValue::Absent);
            }
            return snapshot;
        };

        let timeout = Duration::from_millis(config.timeout_ms);
        for tag in &config.tags {
            let value = match read_tag(ctx, tag, timeout).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        tag = %tag.id,
                        address = tag.address,
                        error = %e,
                        "Tag read failed; marking absent"
                    );
                    TagValue::Absent
                }
            };
            snapshot.insert(tag.id.clone(), value);
        }

        debug!(tags = snapshot.len(), "Snapshot complete");
        snapshot
    }

    async fn disconnect(&mut self) {
        let Some(mut ctx) = self.ctx.take() else {
            return;
        };

        if let Err(e) = ctx.disconnect().await {
            warn!(endpoint = %self.config.endpoint(), error = %e, "Modbus disconnect failed");
        } else {
            info!(endpoint = %self.config.endpoint(), "Disconnected from Modbus device");
        }
    }
}

/// Read and decode one tag.
async fn read_tag(
    ctx: &mut Context,
    tag: &TagConfig,
    timeout: Duration,
) -> Result<TagValue, ReadError> {
    match tag.register {
        RegisterKind::Coil => {
            let bits = run_read(timeout, ctx.read_coils(tag.address, 1)).await?;
            decode_bit(&bits, tag)
        }
        RegisterKind::Discrete => {
            let bits = run_read(timeout, ctx.read_discrete_inputs(tag.address, 1)).await?;
            decode_bit(&bits, tag)
        }
        RegisterKind::Input => {
            let needed = words_needed(tag);
            let words = run_read(timeout, ctx.read_input_registers(tag.address, needed)).await?;
            decode_registers(&words, tag)
        }
        RegisterKind::Holding => {
            let needed = words_needed(tag);
            let words = run_read(timeout, ctx.read_holding_registers(tag.address, needed)).await?;
            decode_registers(&words, tag)
        }
    }
}

/// Await a Modbus read with a timeout, flattening the transport and
/// protocol-exception layers into one error.
async fn run_read<T, P, X>(
    timeout: Duration,
    read: impl Future<Output = Result<Result<T, X>, P>>,
) -> Result<T, ReadError>
where
    P: std::fmt::Display,
    X: std::fmt::Debug,
{
    tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| ReadError::Timeout)?
        .map_err(|e| ReadError::Transport(e.to_string()))?
        .map_err(|e| ReadError::Exception(format!("{e:?}")))
}

/// Registers to request for one tag.
fn words_needed(tag: &TagConfig) -> u16 {
    match tag.data_type {
        DataKind::U16 | DataKind::I16 => 1,
        DataKind::U32 | DataKind::I32 | DataKind::F32 => 2,
        DataKind::Ascii => tag.count,
    }
}

fn decode_bit(bits: &[bool], tag: &TagConfig) -> Result<TagValue, ReadError> {
    let bit = *bits.first().ok_or(ReadError::ShortResponse {
        got: 0,
        needed: 1,
    })?;
    Ok(apply_scaling(TagValue::Integer(bit as i64), tag))
}

/// Decode raw register words into a tag value, big-endian word order.
fn decode_registers(words: &[u16], tag: &TagConfig) -> Result<TagValue, ReadError> {
    let needed = words_needed(tag) as usize;
    if words.len() < needed {
        return Err(ReadError::ShortResponse {
            got: words.len(),
            needed,
        });
    }

    let value = match tag.data_type {
        DataKind::U16 => TagValue::Integer(words[0] as i64),
        DataKind::I16 => TagValue::Integer(words[0] as i16 as i64),
        DataKind::U32 => {
            let raw = ((words[0] as u32) << 16) | (words[1] as u32);
            TagValue::Integer(raw as i64)
        }
        DataKind::I32 => {
            let raw = ((words[0] as u32) << 16) | (words[1] as u32);
            TagValue::Integer(raw as i32 as i64)
        }
        DataKind::F32 => {
            let bits = ((words[0] as u32) << 16) | (words[1] as u32);
            TagValue::Float(f32::from_bits(bits) as f64)
        }
        DataKind::Ascii => {
            let mut bytes = Vec::with_capacity(needed * 2);
            for word in &words[..needed] {
                bytes.push((word >> 8) as u8);
                bytes.push((word & 0xff) as u8);
            }
            let text = String::from_utf8_lossy(&bytes)
                .trim_end_matches(['\0', ' '])
                .to_string();
            TagValue::Text(text)
        }
    };

    Ok(apply_scaling(value, tag))
}

/// Apply scale and offset to numeric readings. An unscaled integer reading
/// stays an integer; any scaling turns it into a float.
fn apply_scaling(value: TagValue, tag: &TagConfig) -> TagValue {
    if tag.is_unscaled() {
        return value;
    }
    match value {
        TagValue::Integer(v) => TagValue::Float(v as f64 * tag.scale + tag.offset),
        TagValue::Float(v) => TagValue::Float(v * tag.scale + tag.offset),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(data_type: DataKind) -> TagConfig {
        TagConfig {
            id: "t".to_string(),
            register: RegisterKind::Holding,
            address: 0,
            data_type,
            count: 1,
            scale: 1.0,
            offset: 0.0,
        }
    }

    #[test]
    fn decodes_integer_kinds() {
        assert_eq!(
            decode_registers(&[120], &tag(DataKind::U16)).unwrap(),
            TagValue::Integer(120)
        );
        assert_eq!(
            decode_registers(&[0xfff6], &tag(DataKind::I16)).unwrap(),
            TagValue::Integer(-10)
        );
        assert_eq!(
            decode_registers(&[0x0001, 0x0000], &tag(DataKind::U32)).unwrap(),
            TagValue::Integer(65536)
        );
        assert_eq!(
            decode_registers(&[0xffff, 0xfffe], &tag(DataKind::I32)).unwrap(),
            TagValue::Integer(-2)
        );
    }

    #[test]
    fn decodes_f32_big_endian() {
        // 123.456 in IEEE 754 is 0x42F6E979.
        let value = decode_registers(&[0x42f6, 0xe979], &tag(DataKind::F32)).unwrap();
        match value {
            TagValue::Float(v) => assert!((v - 123.456).abs() < 0.001),
            other => panic!("Expected Float, got {:?}", other),
        }
    }

    #[test]
    fn decodes_ascii_and_trims_padding() {
        let mut config = tag(DataKind::Ascii);
        config.count = 4;

        // "LINE4" padded with NULs: 4c 49 4e 45 34 00 00 00
        let words = [0x4c49, 0x4e45, 0x3400, 0x0000];
        assert_eq!(
            decode_registers(&words, &config).unwrap(),
            TagValue::Text("LINE4".to_string())
        );
    }

    #[test]
    fn scaling_turns_integers_into_floats() {
        let mut config = tag(DataKind::U16);
        config.scale = 0.1;
        config.offset = -50.0;

        // 1000 * 0.1 - 50 = 50
        assert_eq!(
            decode_registers(&[1000], &config).unwrap(),
            TagValue::Float(50.0)
        );

        // Unscaled stays integral.
        assert_eq!(
            decode_registers(&[1000], &tag(DataKind::U16)).unwrap(),
            TagValue::Integer(1000)
        );
    }

    #[test]
    fn short_response_is_an_error() {
        assert!(matches!(
            decode_registers(&[0x0001], &tag(DataKind::U32)),
            Err(ReadError::ShortResponse { got: 1, needed: 2 })
        ));
    }

    #[test]
    fn bits_decode_to_zero_or_one() {
        let config = tag(DataKind::U16);
        assert_eq!(decode_bit(&[true], &config).unwrap(), TagValue::Integer(1));
        assert_eq!(decode_bit(&[false], &config).unwrap(), TagValue::Integer(0));
    }

    fn source_config(allow_unauthenticated: bool) -> SourceConfig {
        let mut bad_count = tag(DataKind::U16);
        bad_count.id = "bad_count".to_string();

        SourceConfig {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            timeout_ms: 100,
            security: crate::config::SecurityConfig {
                allow_unauthenticated,
            },
            tags: vec![tag(DataKind::U16), bad_count],
        }
    }

    #[tokio::test]
    async fn read_all_without_a_session_covers_every_tag_as_absent() {
        let mut source = ModbusTagSource::new(source_config(true));

        let snapshot = source.read_all().await;

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.values().all(TagValue::is_absent));
    }

    #[tokio::test]
    async fn connect_refuses_unauthenticated_peer_unless_enabled() {
        let mut source = ModbusTagSource::new(source_config(false));

        let err = source.connect().await.unwrap_err();
        assert!(err.reason.contains("allow_unauthenticated"));
    }
}
