// Streams module
// Onset-to-stream tracking, dense-stream pooling and per-stream layers

pub mod builder;
pub mod layer;
pub mod simplify;
pub mod types;

pub use builder::{build_band_streams, build_streams, StreamConfig};
pub use layer::{apply_stream_layers, assign_stream_layers, stream_layer, TrackMedians};
pub use simplify::{simplify_dense_streams, simplify_stream, temporal_pool_events, SimplifyConfig};
pub use types::{find_accents, Layer, Stream, StreamEvent};
