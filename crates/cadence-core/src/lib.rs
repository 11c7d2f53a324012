//! Cadence Core - Playback and playlist coordination
//!
//! This crate provides the core of the Cadence player: catalog building,
//! playlist ordering, the playback engine over a single media resource,
//! preference persistence, spectrum analysis and the coordinator that ties
//! them to a presentation layer.

pub mod app;
pub mod backend;
pub mod catalog;
pub mod command;
pub mod decoder;
pub mod engine;
pub mod media;
pub mod output;
pub mod playlist;
pub mod prefs;
pub mod track;
pub mod visualizer;

pub use app::{ Coordinator, Presenter, ViewState };
pub use backend::SymphoniaBackend;
pub use catalog::{ CatalogBuilder, CatalogError, DirFetcher, MediaFetcher };
pub use command::{ Command, CommandError };
pub use engine::{ EngineEvent, PlaybackEngine, PlaybackObserver, PlaybackSnapshot, StateChange };
pub use media::{ MediaBackend, MediaError, MediaEvent };
pub use playlist::{ LoopMode, Playlist, PlaylistError };
pub use prefs::{ JsonFileStore, MemoryStore, PreferenceStore, Preferences, PrefsError, Theme };
pub use track::Track;
pub use visualizer::{ NoopVisualizer, SpectrumFrame, SpectrumVisualizer, Visualizer, SPECTRUM_BINS };
