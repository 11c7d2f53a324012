//! Audio output via cpal
//!
//! Decoded PCM is queued in a `SampleBuffer` and drained by the device
//! callback. Every block actually sent to the device is mirrored into the
//! shared `AudioTap` so the visualizer sees exactly what is audible.

use std::collections::VecDeque;
use std::sync::atomic::{ AtomicBool, AtomicU32, Ordering };
use std::sync::{ Arc, Mutex };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use thiserror::Error;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get default stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),
}


/// Number of mono samples retained by the tap.
pub const TAP_WINDOW: usize = 1024;


/// Rolling window of the most recent mono samples sent to the device.
#[derive( Debug, Default )]
pub struct AudioTap {
    window: Mutex<VecDeque<f32>>,
}


impl AudioTap {
    pub fn new() -> Self {
        Self {
            window: Mutex::new( VecDeque::with_capacity( TAP_WINDOW ) ),
        }
    }


    /// Appends interleaved samples, mixing each frame down to mono.
    pub fn push_interleaved( &self, samples: &[f32], channels: usize ) {
        let channels = channels.max( 1 );
        let Ok( mut window ) = self.window.lock() else {
            return;
        };
        for frame in samples.chunks( channels ) {
            let mono = frame.iter().sum::<f32>() / frame.len() as f32;
            if window.len() == TAP_WINDOW {
                window.pop_front();
            }
            window.push_back( mono );
        }
    }


    /// Copies the newest `out.len()` samples into `out`, zero-padding the front when short.
    pub fn snapshot( &self, out: &mut [f32] ) {
        out.fill( 0.0 );
        let Ok( window ) = self.window.lock() else {
            return;
        };
        let take = out.len().min( window.len() );
        let skip = window.len() - take;
        let offset = out.len() - take;
        for ( slot, sample ) in out[ offset.. ].iter_mut().zip( window.iter().skip( skip ) ) {
            *slot = *sample;
        }
    }


    /// Forgets all samples, e.g. when playback stops.
    pub fn clear( &self ) {
        if let Ok( mut window ) = self.window.lock() {
            window.clear();
        }
    }
}


/// Shared sample queue between the decode thread and the device callback.
/// Handles channel conversion between source and output.
pub struct SampleBuffer {
    buffer: Mutex<VecDeque<f32>>,
    capacity: usize,
    paused: AtomicBool,
    /// Gain stored as f32 bits
    volume: AtomicU32,
    source_channels: usize,
    output_channels: usize,
    tap: Arc<AudioTap>,
}


impl SampleBuffer {
    /// Creates a buffer holding up to `capacity` source samples.
    pub fn new(
        capacity: usize,
        source_channels: u16,
        output_channels: u16,
        tap: Arc<AudioTap>,
    ) -> Self {
        Self {
            buffer: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            paused: AtomicBool::new( true ),
            volume: AtomicU32::new( 1.0_f32.to_bits() ),
            source_channels: source_channels.max( 1 ) as usize,
            output_channels: output_channels.max( 1 ) as usize,
            tap,
        }
    }


    /// Pushes samples to the buffer. Returns number of samples actually pushed.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let Ok( mut buf ) = self.buffer.lock() else {
            return 0;
        };
        let available = self.capacity.saturating_sub( buf.len() );
        let to_push = samples.len().min( available );
        buf.extend( samples[ ..to_push ].iter().copied() );
        to_push
    }


    /// Fills `output` for the device, converting channel layout and applying gain.
    /// Returns the number of output samples written before silence padding.
    pub fn pop( &self, output: &mut [f32] ) -> usize {
        output.fill( 0.0 );
        if self.paused.load( Ordering::Relaxed ) {
            return 0;
        }

        let Ok( mut buf ) = self.buffer.lock() else {
            return 0;
        };
        let src_ch = self.source_channels;
        let out_ch = self.output_channels;
        let frames = ( output.len() / out_ch ).min( buf.len() / src_ch );

        let mut frame = Vec::with_capacity( src_ch );
        for i in 0..frames {
            frame.clear();
            frame.extend( buf.drain( ..src_ch ) );
            let out = &mut output[ i * out_ch..( i + 1 ) * out_ch ];

            if src_ch == 2 && out_ch == 1 {
                out[ 0 ] = ( frame[ 0 ] + frame[ 1 ] ) * 0.5;
            } else {
                // Copy matching channels, repeat the last source channel for extra outputs
                for ( ch, slot ) in out.iter_mut().enumerate() {
                    *slot = frame[ ch.min( src_ch - 1 ) ];
                }
            }
        }
        drop( buf );

        let written = frames * out_ch;
        let volume = f32::from_bits( self.volume.load( Ordering::Relaxed ) );
        if volume != 1.0 {
            for sample in output[ ..written ].iter_mut() {
                *sample *= volume;
            }
        }

        self.tap.push_interleaved( &output[ ..written ], out_ch );
        written
    }


    pub fn len( &self ) -> usize {
        self.buffer.lock().map( |b| b.len() ).unwrap_or( 0 )
    }


    pub fn is_empty( &self ) -> bool {
        self.len() == 0
    }


    pub fn clear( &self ) {
        if let Ok( mut buf ) = self.buffer.lock() {
            buf.clear();
        }
    }


    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }


    /// Sets the output gain (0.0 = silent, 1.0 = unity).
    pub fn set_volume( &self, volume: f32 ) {
        self.volume.store( volume.to_bits(), Ordering::Relaxed );
    }
}


/// Audio device stream.
/// Note: This struct is NOT Send/Sync due to cpal::Stream.
/// Keep it on the thread where it was created.
pub struct AudioOutput {
    stream: cpal::Stream,
    sample_rate: u32,
}


impl AudioOutput {
    /// Opens the default output device for the given source format.
    ///
    /// Returns the output and the buffer the decoder should feed.
    pub fn new(
        source_sample_rate: u32,
        source_channels: u16,
        tap: Arc<AudioTap>,
    ) -> Result<( Self, Arc<SampleBuffer> ), OutputError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or( OutputError::NoDevice )?;

        tracing::info!( "Using output device: {:?}", device.name() );

        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .collect();

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= source_sample_rate && c.max_sample_rate().0 >= source_sample_rate
        };

        // Prefer an exact channel match at the source rate, then any layout at the
        // source rate, then the device default (the decode thread resamples).
        let config = if let Some( range ) = supported
            .iter()
            .find( |c| c.channels() == source_channels && supports_rate( *c ) )
            .or_else( || supported.iter().find( |c| supports_rate( *c ) ) )
        {
            range.clone().with_sample_rate( cpal::SampleRate( source_sample_rate ) ).config()
        } else {
            device
                .default_output_config()
                .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
                .config()
        };

        tracing::info!(
            "Audio output config: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        // ~500ms of source audio
        let capacity = ( source_sample_rate as usize ) * ( source_channels as usize ) / 2;
        let sample_buffer = Arc::new( SampleBuffer::new(
            capacity,
            source_channels,
            config.channels,
            tap,
        ));
        let callback_buffer = Arc::clone( &sample_buffer );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback_buffer.pop( data );
                },
                |err| {
                    tracing::error!( "Audio output error: {}", err );
                },
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        Ok((
            Self {
                stream,
                sample_rate: config.sample_rate.0,
            },
            sample_buffer,
        ))
    }


    /// Starts the device stream. Audibility is governed by the buffer's pause flag.
    pub fn play( &self ) -> Result<(), OutputError> {
        self.stream
            .play()
            .map_err( |e| OutputError::PlayStream( e.to_string() ) )
    }


    /// Device sample rate.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn buffer( src: u16, out: u16 ) -> ( SampleBuffer, Arc<AudioTap> ) {
        let tap = Arc::new( AudioTap::new() );
        let buf = SampleBuffer::new( 64, src, out, Arc::clone( &tap ) );
        buf.set_paused( false );
        ( buf, tap )
    }


    #[test]
    fn test_starts_paused_and_outputs_silence() {
        let tap = Arc::new( AudioTap::new() );
        let buf = SampleBuffer::new( 16, 1, 1, tap );
        buf.push( &[ 0.5; 4 ] );
        let mut out = [ 1.0; 4 ];
        assert_eq!( buf.pop( &mut out ), 0 );
        assert_eq!( out, [ 0.0; 4 ] );
        assert_eq!( buf.len(), 4 );
    }


    #[test]
    fn test_push_respects_capacity() {
        let ( buf, _ ) = buffer( 1, 1 );
        assert_eq!( buf.push( &[ 0.1; 100 ] ), 64 );
        assert_eq!( buf.push( &[ 0.1; 4 ] ), 0 );
    }


    #[test]
    fn test_mono_to_stereo_duplicates() {
        let ( buf, _ ) = buffer( 1, 2 );
        buf.push( &[ 0.25, -0.5 ] );
        let mut out = [ 0.0; 6 ];
        assert_eq!( buf.pop( &mut out ), 4 );
        assert_eq!( out, [ 0.25, 0.25, -0.5, -0.5, 0.0, 0.0 ] );
    }


    #[test]
    fn test_stereo_to_mono_mixes() {
        let ( buf, _ ) = buffer( 2, 1 );
        buf.push( &[ 1.0, 0.0, 0.5, 0.5 ] );
        let mut out = [ 0.0; 2 ];
        buf.pop( &mut out );
        assert_eq!( out, [ 0.5, 0.5 ] );
    }


    #[test]
    fn test_volume_applies_and_reaches_tap() {
        let ( buf, tap ) = buffer( 1, 1 );
        buf.set_volume( 0.5 );
        buf.push( &[ 1.0, 1.0 ] );
        let mut out = [ 0.0; 2 ];
        buf.pop( &mut out );
        assert_eq!( out, [ 0.5, 0.5 ] );

        let mut window = [ 9.0; 4 ];
        tap.snapshot( &mut window );
        assert_eq!( window, [ 0.0, 0.0, 0.5, 0.5 ] );
    }


    #[test]
    fn test_tap_keeps_newest_window() {
        let tap = AudioTap::new();
        let samples: Vec<f32> = ( 0..TAP_WINDOW + 10 ).map( |i| i as f32 ).collect();
        tap.push_interleaved( &samples, 1 );

        let mut out = [ 0.0; 3 ];
        tap.snapshot( &mut out );
        let last = ( TAP_WINDOW + 9 ) as f32;
        assert_eq!( out, [ last - 2.0, last - 1.0, last ] );

        tap.clear();
        tap.snapshot( &mut out );
        assert_eq!( out, [ 0.0; 3 ] );
    }
}
