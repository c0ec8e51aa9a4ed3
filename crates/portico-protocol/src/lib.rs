pub mod error;
pub mod framing;
pub mod jsonrpc;
pub mod messages;

pub use error::ProtocolError;
pub use framing::{ClientCodec, FrameCodec, ServerCodec, MAX_FRAME_SIZE};
pub use messages::{
    decode_body, encode_body, BoolValue, Code, Empty, ModuleList, RpcRequest, RpcResponse,
    Status, StringValue,
};
