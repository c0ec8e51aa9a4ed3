use crate::error::ProtocolError;
use crate::messages::{RpcRequest, RpcResponse};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame payload: 16 MiB
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Length-prefixed bincode codec.
///
/// `D` is the message type read off the wire, `E` the type written to it, so
/// the same framing serves both ends of a binary-RPC connection.
pub struct FrameCodec<D, E> {
    _marker: PhantomData<fn() -> (D, E)>,
}

/// Codec used by the binary-RPC listener: reads requests, writes responses.
pub type ServerCodec = FrameCodec<RpcRequest, RpcResponse>;

/// Codec used by binary-RPC clients: reads responses, writes requests.
pub type ClientCodec = FrameCodec<RpcResponse, RpcRequest>;

impl<D, E> FrameCodec<D, E> {
    pub fn new() -> Self {
        FrameCodec {
            _marker: PhantomData,
        }
    }
}

impl<D, E> Default for FrameCodec<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DeserializeOwned, E> Decoder for FrameCodec<D, E> {
    type Item = D;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_PREFIX];
        length_bytes.copy_from_slice(&src[..LENGTH_PREFIX]);
        let length = u32::from_be_bytes(length_bytes);

        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        let frame_len = LENGTH_PREFIX + length as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let payload = src.split_to(length as usize);

        Ok(Some(bincode::deserialize(&payload)?))
    }
}

impl<D, E: Serialize> Encoder<E> for FrameCodec<D, E> {
    type Error = ProtocolError;

    fn encode(&mut self, msg: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&msg)?;

        let length = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        dst.reserve(LENGTH_PREFIX + payload.len());
        dst.put_u32(length);
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Code, Status};

    fn request(id: u64, method: &str) -> RpcRequest {
        RpcRequest {
            id,
            service: "ping".to_string(),
            method: method.to_string(),
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_request_survives_framing() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();

        let mut buffer = BytesMut::new();
        client
            .encode(request(7, "info"), &mut buffer)
            .expect("encode failed");

        let decoded = server
            .decode(&mut buffer)
            .expect("decode failed")
            .expect("no message");

        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.service, "ping");
        assert_eq!(decoded.method, "info");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_read() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();

        let mut buffer = BytesMut::new();
        client
            .encode(request(1, "status"), &mut buffer)
            .expect("encode failed");

        let mut partial = buffer.split_to(LENGTH_PREFIX);
        let result = server.decode(&mut partial).expect("decode should not error");
        assert!(result.is_none(), "Should return None when incomplete");

        partial.extend_from_slice(&buffer[..3]);
        let result = server.decode(&mut partial).expect("decode should not error");
        assert!(result.is_none(), "Should still return None when incomplete");

        partial.extend_from_slice(&buffer[3..]);
        let result = server.decode(&mut partial).expect("decode should not error");
        assert!(result.is_some(), "Should decode when complete");
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut server = ServerCodec::new();
        let mut client = ClientCodec::new();

        let mut buffer = BytesMut::new();
        server
            .encode(RpcResponse::ok(1, vec![1]), &mut buffer)
            .expect("encode 1 failed");
        server
            .encode(
                RpcResponse::error(2, Status::new(Code::NotFound, "no such module")),
                &mut buffer,
            )
            .expect("encode 2 failed");

        let first = client.decode(&mut buffer).unwrap().expect("first frame");
        assert_eq!(first.id, 1);
        assert!(first.status.is_ok());

        let second = client.decode(&mut buffer).unwrap().expect("second frame");
        assert_eq!(second.id, 2);
        assert_eq!(second.status.code, Code::NotFound);

        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_length_prefix_over_limit() {
        let mut buffer = BytesMut::new();
        buffer.put_u32(MAX_FRAME_SIZE + 1);
        buffer.put_slice(b"some data");

        let mut codec = ServerCodec::new();
        let result = codec.decode(&mut buffer);

        assert!(matches!(result, Err(ProtocolError::FrameTooLarge(_))));
    }

    #[test]
    fn test_zero_length_frame() {
        let mut buffer = BytesMut::new();
        buffer.put_u32(0);

        let mut codec = ServerCodec::new();
        assert!(
            codec.decode(&mut buffer).is_err(),
            "Empty payload cannot hold a request"
        );
    }
}
