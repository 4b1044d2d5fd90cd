//! Event infrastructure: the application event model and its translation
//! from native event handles.

mod stream;
pub mod translation;
mod types;

pub use stream::EventStream;
pub use translation::{
    translate, DeliveryReports, Route, RoutedDelivery, TranslateOptions, Translation,
};
pub use types::{Event, Header, KafkaError, Message, Offset, Opaque, Stats, TopicPartition};
