// Audio module
// Band stem ingestion and the attack-shape filter that needs raw samples

pub mod ingest;
pub mod transient;

pub use ingest::{
    ingest_wav, load_band_signals, load_band_wav, AudioData, AudioError, BandSignal, BandSignals,
};
pub use transient::{filter_band_transients, filter_transient_mid_high, is_attack};
