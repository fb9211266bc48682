//! Domain models for mdcs-data

pub mod observer;
pub mod point;

pub use observer::{
    ChoiceOption, Observer, ObserverVersionError, PromptDefinition, PromptType,
    RepeatableSetDefinition, StreamDefinition, UnchangedStream,
};
pub use point::{
    DataPoint, FlatResponseRow, InvalidPoint, PointMetadata, PromptResponse,
    PromptResponseMetadata, UploadPoint, SENTINEL_NOT_DISPLAYED, SENTINEL_SKIPPED,
};
