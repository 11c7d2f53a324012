//! Frequency-spectrum visualization
//!
//! The engine only ever calls `start()` and `stop()`. The spectrum
//! implementation runs a per-frame render loop on its own thread while
//! playing, reading the output tap and publishing byte magnitudes into a
//! `SpectrumFrame` that the presentation layer draws from.

use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::{ Arc, Mutex };
use std::thread;
use std::time::Duration;

use rustfft::num_complex::Complex;
use rustfft::{ Fft, FftPlanner };

use crate::output::AudioTap;


/// Analysis window length in samples.
pub const FFT_SIZE: usize = 256;

/// Number of magnitude bins produced per frame.
pub const SPECTRUM_BINS: usize = FFT_SIZE / 2;

/// Render loop period (~60 frames per second).
const FRAME_INTERVAL: Duration = Duration::from_millis( 16 );

const SMOOTHING: f32 = 0.8;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;


/// Capability the playback engine drives on transport transitions.
pub trait Visualizer: Send + Sync {
    /// Starts (or restarts) the render loop.
    fn start( &self );

    /// Cancels the render loop and clears the display.
    fn stop( &self );
}


/// Visualizer that does nothing, for headless use.
#[derive( Debug, Default, Clone, Copy )]
pub struct NoopVisualizer;


impl Visualizer for NoopVisualizer {
    fn start( &self ) {}

    fn stop( &self ) {}
}


/// Latest rendered spectrum, shared with the presentation layer.
#[derive( Debug )]
pub struct SpectrumFrame {
    bins: Mutex<Vec<u8>>,
    rendered: AtomicU64,
}


impl SpectrumFrame {
    pub fn new() -> Self {
        Self {
            bins: Mutex::new( vec![ 0; SPECTRUM_BINS ] ),
            rendered: AtomicU64::new( 0 ),
        }
    }


    /// Copy of the current magnitudes (0-255 per bin).
    pub fn bins( &self ) -> Vec<u8> {
        self.bins.lock().map( |b| b.clone() ).unwrap_or_default()
    }


    /// Number of frames rendered since creation.
    pub fn rendered( &self ) -> u64 {
        self.rendered.load( Ordering::Relaxed )
    }


    fn publish( &self, bins: &[u8] ) {
        if let Ok( mut current ) = self.bins.lock() {
            current.clear();
            current.extend_from_slice( bins );
        }
        self.rendered.fetch_add( 1, Ordering::Relaxed );
    }


    fn clear( &self ) {
        if let Ok( mut current ) = self.bins.lock() {
            current.iter_mut().for_each( |b| *b = 0 );
        }
    }
}


/// Windowed FFT with temporal smoothing and decibel scaling to bytes.
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}


impl SpectrumAnalyser {
    pub fn new() -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward( FFT_SIZE );

        // Blackman window
        let n = FFT_SIZE as f32;
        let window = ( 0..FFT_SIZE )
            .map( |i| {
                let x = std::f32::consts::TAU * i as f32 / n;
                0.42 - 0.5 * x.cos() + 0.08 * ( 2.0 * x ).cos()
            })
            .collect();

        Self {
            fft,
            window,
            smoothed: vec![ 0.0; SPECTRUM_BINS ],
            buffer: vec![ Complex::default(); FFT_SIZE ],
        }
    }


    /// Analyses the newest `FFT_SIZE` samples. Shorter input is zero-padded.
    pub fn analyse( &mut self, samples: &[f32] ) -> Vec<u8> {
        let offset = samples.len().saturating_sub( FFT_SIZE );
        let samples = &samples[ offset.. ];
        let pad = FFT_SIZE - samples.len();

        for ( i, slot ) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { samples[ i - pad ] };
            *slot = Complex::new( sample * self.window[ i ], 0.0 );
        }
        self.fft.process( &mut self.buffer );

        let scale = 1.0 / FFT_SIZE as f32;
        self.smoothed
            .iter_mut()
            .zip( self.buffer.iter() )
            .map( |( smoothed, bin )| {
                *smoothed = SMOOTHING * *smoothed + ( 1.0 - SMOOTHING ) * bin.norm() * scale;
                let db = 20.0 * smoothed.max( f32::MIN_POSITIVE ).log10();
                let level = ( db - MIN_DB ) / ( MAX_DB - MIN_DB );
                ( level.clamp( 0.0, 1.0 ) * 255.0 ) as u8
            })
            .collect()
    }
}


impl Default for SpectrumAnalyser {
    fn default() -> Self {
        Self::new()
    }
}


struct RenderLoop {
    stop_flag: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}


impl RenderLoop {
    fn cancel( self ) {
        self.stop_flag.store( true, Ordering::Relaxed );
        let _ = self.thread.join();
    }
}


/// Spectrum visualizer fed from the output tap.
pub struct SpectrumVisualizer {
    tap: Arc<AudioTap>,
    frame: Arc<SpectrumFrame>,
    render_loop: Mutex<Option<RenderLoop>>,
}


impl SpectrumVisualizer {
    pub fn new( tap: Arc<AudioTap> ) -> Self {
        Self {
            tap,
            frame: Arc::new( SpectrumFrame::new() ),
            render_loop: Mutex::new( None ),
        }
    }


    /// The frame the render loop publishes into.
    pub fn frame( &self ) -> Arc<SpectrumFrame> {
        Arc::clone( &self.frame )
    }


    pub fn is_running( &self ) -> bool {
        self.render_loop.lock().map( |l| l.is_some() ).unwrap_or( false )
    }


    fn cancel_loop( &self ) {
        let running = self.render_loop.lock().ok().and_then( |mut l| l.take() );
        if let Some( render_loop ) = running {
            render_loop.cancel();
        }
    }
}


impl Visualizer for SpectrumVisualizer {
    fn start( &self ) {
        // Never run two loops at once
        self.cancel_loop();

        let stop_flag = Arc::new( AtomicBool::new( false ) );
        let tap = Arc::clone( &self.tap );
        let frame = Arc::clone( &self.frame );
        let flag = Arc::clone( &stop_flag );

        let spawned = thread::Builder::new()
            .name( "cadence-visualizer".into() )
            .spawn( move || {
                let mut analyser = SpectrumAnalyser::new();
                let mut window = vec![ 0.0; FFT_SIZE ];
                while !flag.load( Ordering::Relaxed ) {
                    tap.snapshot( &mut window );
                    frame.publish( &analyser.analyse( &window ) );
                    thread::sleep( FRAME_INTERVAL );
                }
                tracing::debug!( "Visualizer loop: exiting" );
            });

        match spawned {
            Ok( thread ) => {
                if let Ok( mut slot ) = self.render_loop.lock() {
                    *slot = Some( RenderLoop { stop_flag, thread } );
                }
            }
            Err( e ) => tracing::warn!( "Failed to start visualizer: {}", e ),
        }
    }


    fn stop( &self ) {
        self.cancel_loop();
        self.frame.clear();
    }
}


impl Drop for SpectrumVisualizer {
    fn drop( &mut self ) {
        self.cancel_loop();
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_silence_is_all_zero() {
        let mut analyser = SpectrumAnalyser::new();
        let bins = analyser.analyse( &[ 0.0; FFT_SIZE ] );
        assert_eq!( bins.len(), SPECTRUM_BINS );
        assert!( bins.iter().all( |b| *b == 0 ) );
    }


    #[test]
    fn test_tone_peaks_at_its_bin() {
        let mut analyser = SpectrumAnalyser::new();
        let target = 16;
        let tone: Vec<f32> = ( 0..FFT_SIZE )
            .map( |i| ( std::f32::consts::TAU * target as f32 * i as f32 / FFT_SIZE as f32 ).sin() )
            .collect();

        let mut bins = Vec::new();
        for _ in 0..20 {
            bins = analyser.analyse( &tone );
        }
        assert_eq!( bins[ target ], 255 );
        assert!( bins[ 4 ] < 50 );
        assert!( bins[ 40 ] < 50 );
        assert!( bins[ 100 ] < 50 );
    }


    #[test]
    fn test_short_input_is_padded() {
        let mut analyser = SpectrumAnalyser::new();
        assert_eq!( analyser.analyse( &[ 0.5; 10 ] ).len(), SPECTRUM_BINS );
    }


    #[test]
    fn test_start_stop_controls_loop() {
        let tap = Arc::new( AudioTap::new() );
        let vis = SpectrumVisualizer::new( tap );
        let frame = vis.frame();

        vis.start();
        assert!( vis.is_running() );
        thread::sleep( Duration::from_millis( 80 ) );
        assert!( frame.rendered() > 0 );

        vis.stop();
        assert!( !vis.is_running() );
        let after_stop = frame.rendered();
        thread::sleep( Duration::from_millis( 60 ) );
        assert_eq!( frame.rendered(), after_stop );
        assert!( frame.bins().iter().all( |b| *b == 0 ) );
    }


    #[test]
    fn test_restart_keeps_single_loop() {
        let vis = SpectrumVisualizer::new( Arc::new( AudioTap::new() ) );
        vis.start();
        vis.start();
        assert!( vis.is_running() );
        vis.stop();
        assert!( !vis.is_running() );
    }
}
