mod coordinator;
mod error;
mod state;

pub mod availability;
pub mod client;
pub mod config;
pub mod executor;
pub mod sink;
pub mod stream;
pub mod types;
pub mod utils;

pub use error::{ConductorError, Result};

pub use availability::{Availability, ModelAvailabilityChecker};
pub use client::{OllamaClient, PendingGeneration};
pub use config::{ClientConfig, DEFAULT_BASE_URL, Env, parse_dotenv};
pub use coordinator::CANCELLED_NOTICE;
pub use executor::{
    ANALYZING_PICTURE_NOTICE, EMPTY_RESPONSE, GenerationRequestExecutor, LOAD_FAILED_NOTICE,
    LOADING_NOTICE, Reply, THINKING_NOTICE, WAIT_COMPLETE_NOTICE, WAIT_STREAM_NOTICE,
    extract_reply,
};
pub use sink::{ChannelSink, ClientEvent, EventSink};
pub use stream::{
    ChunkStream, ClosableStream, LineStream, StreamCloseHandle, closable_stream,
    parse_generate_stream,
};
pub use types::{
    ClientState, DEFAULT_COMPLETE_PROMPT, DEFAULT_IMAGE_PROMPT, DEFAULT_KEEP_ALIVE,
    GenerateRequest, LoadedModel, Outcome, StreamChunk, TEXT_MODEL, VISION_MODEL,
};
pub use utils::ndjson::NdjsonLimits;
