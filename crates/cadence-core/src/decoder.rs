//! Audio decoding and tag extraction via Symphonia
//!
//! `Decoder` streams interleaved f32 PCM for the media backend.
//! `read_tags` probes an in-memory file for display metadata and cover art.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{ Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL };
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{ FormatOptions, FormatReader, SeekMode, SeekTo };
use symphonia::core::io::{ MediaSource, MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::{ MetadataOptions, MetadataRevision, StandardTagKey };
use symphonia::core::probe::{ Hint, ProbeResult };
use symphonia::core::units::Time;
use thiserror::Error;

use crate::track::Artwork;


/// Errors that can occur during decoding.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Seek error: {0}" )]
    Seek( String ),
}


/// Display metadata read from a file's tags.
#[derive( Debug, Clone, Default )]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub artwork: Option<Artwork>,
}


impl TrackTags {
    fn absorb( &mut self, revision: &MetadataRevision ) {
        for tag in revision.tags() {
            let value = tag.value.to_string();
            if value.trim().is_empty() {
                continue;
            }
            match tag.std_key {
                Some( StandardTagKey::TrackTitle ) if self.title.is_none() => {
                    self.title = Some( value );
                }
                Some( StandardTagKey::Artist ) if self.artist.is_none() => {
                    self.artist = Some( value );
                }
                _ => {}
            }
        }

        if self.artwork.is_none() {
            self.artwork = revision.visuals().first().map( |visual| Artwork {
                media_type: visual.media_type.clone(),
                data: visual.data.to_vec(),
            });
        }
    }
}


fn probe(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
    buffer_len: usize,
) -> Result<ProbeResult, DecoderError> {
    let mss = MediaSourceStream::new( source, MediaSourceStreamOptions { buffer_len } );

    let mut hint = Hint::new();
    if let Some( ext ) = extension {
        hint.with_extension( ext );
    }

    symphonia::default::get_probe()
        .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
        .map_err( |_| DecoderError::UnsupportedFormat )
}


/// Reads title, artist and cover art from an in-memory audio file.
///
/// Fails only when the bytes are not a recognisable audio container;
/// missing individual tags are left as `None`.
pub fn read_tags( bytes: Vec<u8>, extension: Option<&str> ) -> Result<TrackTags, DecoderError> {
    let mut probed = probe( Box::new( Cursor::new( bytes ) ), extension, 64 * 1024 )?;
    let mut tags = TrackTags::default();

    // Container-level tags (ID3v2 ahead of the stream) first, then in-stream tags.
    if let Some( log ) = probed.metadata.get() {
        if let Some( revision ) = log.current() {
            tags.absorb( revision );
        }
    }
    if let Some( revision ) = probed.format.metadata().current() {
        tags.absorb( revision );
    }

    Ok( tags )
}


/// Streaming PCM decoder over a file on disk.
pub struct Decoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    duration: Option<f64>,
}


impl Decoder {
    /// Opens an audio file for decoding.
    pub fn open( path: &Path ) -> Result<Self, DecoderError> {
        let file = File::open( path )?;
        let extension = path.extension().and_then( |e| e.to_str() );
        let probed = probe( Box::new( file ), extension, 64 * 1024 )?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or( DecoderError::NoAudioTrack )?;

        let track_id = track.id;
        let codec_params = &track.codec_params;
        let sample_rate = codec_params.sample_rate.unwrap_or( 44100 );
        let channels = codec_params.channels.map( |c| c.count() ).unwrap_or( 2 );
        let duration = codec_params.n_frames.map( |frames| frames as f64 / sample_rate as f64 );

        tracing::info!(
            "Opened audio: {} Hz, {} channels, duration: {:?}s",
            sample_rate,
            channels,
            duration
        );

        let decoder = symphonia::default::get_codecs()
            .make( codec_params, &DecoderOptions::default() )
            .map_err( |e| DecoderError::DecoderCreation( e.to_string() ) )?;

        Ok( Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
            duration,
        })
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> usize {
        self.channels
    }


    /// Returns the duration in seconds, if the container reports one.
    pub fn duration( &self ) -> Option<f64> {
        self.duration
    }


    /// Decodes the next packet and returns interleaved f32 samples.
    ///
    /// Returns None when EOF is reached.
    pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( SymphoniaError::IoError( ref e ) )
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok( None );
                }
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode( &packet ) {
                Ok( decoded ) => decoded,
                // Corrupt packets are skipped
                Err( SymphoniaError::DecodeError( _ ) ) => continue,
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            let spec = *decoded.spec();
            let frames = decoded.capacity() as u64;
            let needed = decoded.capacity() * spec.channels.count();
            if self.sample_buf.as_ref().is_some_and( |b| b.capacity() < needed ) {
                self.sample_buf = None;
            }
            let buf = self.sample_buf.get_or_insert_with( || SampleBuffer::new( frames, spec ) );
            buf.copy_interleaved_ref( decoded );

            return Ok( Some( buf.samples().to_vec() ) );
        }
    }


    /// Seeks to a position in seconds.
    pub fn seek( &mut self, position_secs: f64 ) -> Result<(), DecoderError> {
        let seek_to = SeekTo::Time {
            time: Time::from( position_secs ),
            track_id: Some( self.track_id ),
        };

        self.format_reader
            .seek( SeekMode::Accurate, seek_to )
            .map_err( |e| DecoderError::Seek( e.to_string() ) )?;
        self.decoder.reset();

        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_read_tags_rejects_garbage() {
        let result = read_tags( vec![ 0x42; 2048 ], Some( "mp3" ) );
        assert!( matches!( result, Err( DecoderError::UnsupportedFormat ) ) );
    }


    #[test]
    fn test_open_missing_file() {
        let result = Decoder::open( Path::new( "/definitely/not/here.flac" ) );
        assert!( matches!( result, Err( DecoderError::FileOpen( _ ) ) ) );
    }
}
