//! Local-file media backend
//!
//! Decodes with Symphonia on a dedicated thread, resamples with rubato when
//! the device rate differs, and plays through cpal. Each load or seek opens
//! a fresh session; the previous one is stopped and joined first.

use std::path::{ Path, PathBuf };
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::mpsc::{ self, Receiver, Sender };
use std::sync::Arc;
use std::thread;
use std::time::{ Duration, Instant };

use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::decoder::Decoder;
use crate::media::{ MediaBackend, MediaError, MediaEvent };
use crate::output::{ AudioOutput, AudioTap, SampleBuffer };


/// Interval between synthesized progress events while playing.
const PROGRESS_INTERVAL: Duration = Duration::from_millis( 250 );


/// Converts planar samples back to interleaved format.
/// [[L0, L1, ...], [R0, R1, ...]] → [L0, R0, L1, R1, ...]
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    let Some( first ) = channels.first() else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity( first.len() * channels.len() );
    for f in 0..first.len() {
        for ch in channels {
            out.push( ch[ f ] );
        }
    }
    out
}


/// Pushes all of `samples` into `buffer`, waiting for room, unless stopped.
fn push_blocking( buffer: &SampleBuffer, samples: &[f32], stop_flag: &AtomicBool ) {
    let mut offset = 0;
    while offset < samples.len() && !stop_flag.load( Ordering::Relaxed ) {
        let pushed = buffer.push( &samples[ offset.. ] );
        offset += pushed;
        if pushed == 0 {
            thread::sleep( Duration::from_millis( 5 ) );
        }
    }
}


/// One open source: decode thread plus device stream.
struct Session {
    stop_flag: Arc<AtomicBool>,
    sample_buffer: Arc<SampleBuffer>,
    // Dropping the output stops the device stream
    _output: AudioOutput,
    thread: Option<thread::JoinHandle<()>>,
    frames_played: Arc<AtomicU64>,
    sample_rate: u32,
    duration: Option<Duration>,
}


impl Session {
    fn shutdown( mut self ) {
        self.stop_flag.store( true, Ordering::Relaxed );
        self.sample_buffer.clear();
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
    }
}


/// Media backend playing local files on the default output device.
pub struct SymphoniaBackend {
    tap: Arc<AudioTap>,
    source: Option<PathBuf>,
    session: Option<Session>,
    volume: f32,
    muted: bool,
    events_tx: Sender<MediaEvent>,
    events_rx: Receiver<MediaEvent>,
    last_progress: Instant,
}


impl SymphoniaBackend {
    pub fn new() -> Self {
        let ( events_tx, events_rx ) = mpsc::channel();
        Self {
            tap: Arc::new( AudioTap::new() ),
            source: None,
            session: None,
            volume: 1.0,
            muted: false,
            events_tx,
            events_rx,
            last_progress: Instant::now(),
        }
    }


    /// The stream of samples sent to the device, for visualization.
    pub fn tap( &self ) -> Arc<AudioTap> {
        Arc::clone( &self.tap )
    }


    fn gain( &self ) -> f32 {
        if self.muted { 0.0 } else { self.volume }
    }


    fn teardown( &mut self ) {
        if let Some( session ) = self.session.take() {
            session.shutdown();
            tracing::debug!( "Media session closed" );
        }
        // Events from the closed session no longer apply
        while self.events_rx.try_recv().is_ok() {}
        self.tap.clear();
    }


    /// Opens `path` positioned at `start`, paused.
    fn open_session( &self, path: &Path, start: Duration ) -> Result<Session, MediaError> {
        let mut decoder = Decoder::open( path )?;
        if start > Duration::ZERO {
            decoder.seek( start.as_secs_f64() )?;
        }

        let source_rate = decoder.sample_rate();
        let channels = decoder.channels() as u16;
        let duration = decoder.duration().map( Duration::from_secs_f64 );

        let ( output, sample_buffer ) = AudioOutput::new( source_rate, channels, self.tap() )?;
        sample_buffer.set_volume( self.gain() );
        let target_rate = output.sample_rate();
        output.play()?;

        let resampler = if source_rate != target_rate {
            tracing::info!( "Resampling: {} Hz → {} Hz", source_rate, target_rate );
            let resampler = FastFixedOut::<f32>::new(
                target_rate as f64 / source_rate as f64,
                2.0,
                PolynomialDegree::Cubic,
                1024,
                channels as usize,
            ).map_err( |e| MediaError::Output( format!( "Failed to create resampler: {}", e ) ) )?;
            Some( resampler )
        } else {
            None
        };

        let stop_flag = Arc::new( AtomicBool::new( false ) );
        let start_frames = ( start.as_secs_f64() * source_rate as f64 ) as u64;
        let frames_played = Arc::new( AtomicU64::new( start_frames ) );

        let thread = {
            let stop_flag = Arc::clone( &stop_flag );
            let sample_buffer = Arc::clone( &sample_buffer );
            let frames_played = Arc::clone( &frames_played );
            let events = self.events_tx.clone();
            thread::Builder::new()
                .name( "cadence-decode".into() )
                .spawn( move || {
                    decode_loop( decoder, sample_buffer, stop_flag, resampler, frames_played, events );
                })
                .map_err( |e| MediaError::Output( e.to_string() ) )?
        };

        Ok( Session {
            stop_flag,
            sample_buffer,
            _output: output,
            thread: Some( thread ),
            frames_played,
            sample_rate: source_rate,
            duration,
        })
    }
}


impl Default for SymphoniaBackend {
    fn default() -> Self {
        Self::new()
    }
}


impl MediaBackend for SymphoniaBackend {
    fn load( &mut self, source: &Path ) -> Result<(), MediaError> {
        self.teardown();
        self.source = None;

        tracing::info!( "Loading: {:?}", source );
        let session = self.open_session( source, Duration::ZERO )?;
        let duration = session.duration;
        self.session = Some( session );
        self.source = Some( source.to_path_buf() );

        let _ = self.events_tx.send( MediaEvent::MetadataLoaded { duration } );
        Ok(())
    }


    fn play( &mut self ) -> Result<(), MediaError> {
        let session = self.session.as_ref().ok_or( MediaError::NotLoaded )?;
        session.sample_buffer.set_paused( false );
        self.last_progress = Instant::now();
        Ok(())
    }


    fn pause( &mut self ) {
        if let Some( ref session ) = self.session {
            session.sample_buffer.set_paused( true );
        }
    }


    /// Reopens the source at `position`, keeping the paused/playing state.
    fn seek( &mut self, position: Duration ) -> Result<(), MediaError> {
        let source = self.source.clone().ok_or( MediaError::NotLoaded )?;
        let was_playing = self.session
            .as_ref()
            .is_some_and( |s| !s.sample_buffer.is_paused() );

        tracing::info!( "Seeking to {:?} in {:?}", position, source );
        self.teardown();
        let session = self.open_session( &source, position )?;
        session.sample_buffer.set_paused( !was_playing );
        self.session = Some( session );
        Ok(())
    }


    fn position( &self ) -> Duration {
        match self.session {
            Some( ref s ) => {
                let frames = s.frames_played.load( Ordering::Relaxed );
                Duration::from_secs_f64( frames as f64 / s.sample_rate as f64 )
            }
            None => Duration::ZERO,
        }
    }


    fn duration( &self ) -> Option<Duration> {
        self.session.as_ref().and_then( |s| s.duration )
    }


    fn set_volume( &mut self, volume: f32 ) {
        self.volume = volume;
        if let Some( ref session ) = self.session {
            session.sample_buffer.set_volume( self.gain() );
        }
    }


    fn set_muted( &mut self, muted: bool ) {
        self.muted = muted;
        if let Some( ref session ) = self.session {
            session.sample_buffer.set_volume( self.gain() );
        }
    }


    fn poll_event( &mut self ) -> Option<MediaEvent> {
        if let Ok( event ) = self.events_rx.try_recv() {
            return Some( event );
        }

        let playing = self.session.as_ref().is_some_and( |s| !s.sample_buffer.is_paused() );
        if playing && self.last_progress.elapsed() >= PROGRESS_INTERVAL {
            self.last_progress = Instant::now();
            return Some( MediaEvent::TimeUpdate {
                position: self.position(),
                duration: self.duration(),
            });
        }
        None
    }
}


impl Drop for SymphoniaBackend {
    fn drop( &mut self ) {
        self.teardown();
    }
}


/// Decodes until EOF, error or stop, feeding the sample buffer.
fn decode_loop(
    mut decoder: Decoder,
    sample_buffer: Arc<SampleBuffer>,
    stop_flag: Arc<AtomicBool>,
    mut resampler: Option<FastFixedOut<f32>>,
    frames_played: Arc<AtomicU64>,
    events: Sender<MediaEvent>,
) {
    let channels = decoder.channels();
    let mut pending: Vec<Vec<f32>> = ( 0..channels ).map( |_| Vec::new() ).collect();
    // Keep roughly 50ms decoded ahead of the device
    let target_buffer = ( decoder.sample_rate() as usize * channels ) / 20;

    loop {
        if stop_flag.load( Ordering::Relaxed ) {
            tracing::debug!( "Decode loop: stop signal received" );
            break;
        }

        if sample_buffer.is_paused() || sample_buffer.len() > target_buffer {
            thread::sleep( Duration::from_millis( 5 ) );
            continue;
        }

        match decoder.decode_next() {
            Ok( Some( samples ) ) => {
                frames_played.fetch_add( ( samples.len() / channels ) as u64, Ordering::Relaxed );

                let output = match resampler.as_mut() {
                    Some( resampler ) => {
                        for frame in samples.chunks( channels ) {
                            for ( ch, sample ) in frame.iter().enumerate() {
                                pending[ ch ].push( *sample );
                            }
                        }

                        let mut out = Vec::new();
                        while pending[ 0 ].len() >= resampler.input_frames_next() {
                            let needed = resampler.input_frames_next();
                            let chunk: Vec<Vec<f32>> = pending
                                .iter_mut()
                                .map( |ch| ch.drain( ..needed ).collect() )
                                .collect();
                            match resampler.process( &chunk, None ) {
                                Ok( resampled ) => out.extend( interleave( &resampled ) ),
                                Err( e ) => {
                                    tracing::error!( "Resample error: {}", e );
                                    break;
                                }
                            }
                        }
                        out
                    }
                    None => samples,
                };

                push_blocking( &sample_buffer, &output, &stop_flag );
            }
            Ok( None ) => {
                if let Some( resampler ) = resampler.as_mut() {
                    if !pending[ 0 ].is_empty() {
                        match resampler.process_partial( Some( pending.as_slice() ), None ) {
                            Ok( resampled ) => push_blocking( &sample_buffer, &interleave( &resampled ), &stop_flag ),
                            Err( e ) => tracing::error!( "Final resample error: {}", e ),
                        }
                    }
                }

                tracing::info!( "Decode loop: reached end of file" );
                while !sample_buffer.is_empty() && !stop_flag.load( Ordering::Relaxed ) {
                    thread::sleep( Duration::from_millis( 10 ) );
                }
                if !stop_flag.load( Ordering::Relaxed ) {
                    let _ = events.send( MediaEvent::Ended );
                }
                break;
            }
            Err( e ) => {
                tracing::error!( "Decode error: {}", e );
                if !stop_flag.load( Ordering::Relaxed ) {
                    let _ = events.send( MediaEvent::Failed { message: e.to_string() } );
                }
                break;
            }
        }
    }

    tracing::debug!( "Decode loop: exiting" );
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ -1.0, -2.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, -1.0, 2.0, -2.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }


    #[test]
    fn test_unloaded_backend() {
        let mut backend = SymphoniaBackend::new();
        assert!( matches!( backend.play(), Err( MediaError::NotLoaded ) ) );
        assert!( matches!( backend.seek( Duration::from_secs( 1 ) ), Err( MediaError::NotLoaded ) ) );
        assert_eq!( backend.position(), Duration::ZERO );
        assert_eq!( backend.duration(), None );
        assert_eq!( backend.poll_event(), None );
    }


    #[test]
    fn test_load_missing_file_fails_before_touching_device() {
        let mut backend = SymphoniaBackend::new();
        let result = backend.load( Path::new( "/no/such/track.mp3" ) );
        assert!( matches!( result, Err( MediaError::Open( _ ) ) ) );
        assert_eq!( backend.poll_event(), None );
    }
}
