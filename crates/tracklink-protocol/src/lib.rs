pub mod body;
pub mod codec;
pub mod event;
pub mod frame;
pub mod message;
pub mod registry;
pub mod stream_parser;

pub use body::{
    AlarmFlags, Authentication, BatchLocationUpload, ExtraItem, GeneralResponse, LocationReport,
    RegistrationRequest, RegistrationResponse, StatusFlags,
};
pub use codec::{Decoded, Jt808Codec};
pub use event::{DomainEvent, EventKind, StatusChange, StatusReason};
pub use message::{BodyAttributes, HexId, Message, SubpackageInfo};
pub use registry::{Body, BodyCodec, MessageRegistry};
pub use stream_parser::{ParsedFrame, ParserState, StreamParser};
