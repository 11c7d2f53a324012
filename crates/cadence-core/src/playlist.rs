//! Playlist ordering
//!
//! Keeps the canonical catalog order alongside the working order used for
//! navigation, and computes next-track indices under a loop policy.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::track::Track;


/// Errors that can occur with playlist operations.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum PlaylistError {
    #[error( "Reordered sequence is not a permutation of the catalog" )]
    NotAPermutation,

    #[error( "Index {index} out of range for playlist of {len} tracks" )]
    OutOfRange { index: usize, len: usize },
}


/// Behaviour when the current track ends.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum LoopMode {
    /// Stop at the end of the playlist.
    #[default]
    None,
    /// Wrap to the first track.
    All,
    /// Repeat the current track indefinitely.
    One,
}


impl LoopMode {
    /// Next mode in the fixed cycle `none → all → one → none`.
    pub fn next( self ) -> Self {
        match self {
            LoopMode::None => LoopMode::All,
            LoopMode::All => LoopMode::One,
            LoopMode::One => LoopMode::None,
        }
    }


    pub fn name( &self ) -> &'static str {
        match self {
            LoopMode::None => "none",
            LoopMode::All => "all",
            LoopMode::One => "one",
        }
    }
}


/// Track ordering for the catalog.
#[derive( Debug, Default )]
pub struct Playlist {
    /// Catalog order as built. Never changed after construction.
    canonical: Vec<Arc<Track>>,
    /// Active order used for navigation (canonical, shuffled or manually arranged).
    working: Vec<Arc<Track>>,
    shuffled: bool,
}


impl Playlist {
    /// Creates a playlist whose canonical and working orders are `tracks`.
    pub fn new( tracks: Vec<Arc<Track>> ) -> Self {
        Self {
            working: tracks.clone(),
            canonical: tracks,
            shuffled: false,
        }
    }


    /// Gets the working order.
    pub fn tracks( &self ) -> &[Arc<Track>] {
        &self.working
    }


    /// Gets the canonical catalog order.
    pub fn canonical( &self ) -> &[Arc<Track>] {
        &self.canonical
    }


    pub fn get( &self, index: usize ) -> Option<&Arc<Track>> {
        self.working.get( index )
    }


    pub fn len( &self ) -> usize {
        self.working.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.working.is_empty()
    }


    pub fn is_shuffled( &self ) -> bool {
        self.shuffled
    }


    /// Index of the track with `id` in the working order.
    pub fn position_of( &self, id: &str ) -> Option<usize> {
        self.working.iter().position( |t| t.id() == id )
    }


    /// Computes the track that follows `current` under `loop_mode`.
    ///
    /// `LoopMode::One` is treated like `LoopMode::None`: repeating a single
    /// track is handled by the playback engine before this is consulted.
    /// A `None` current index means "before the first track".
    pub fn next_track_index( &self, current: Option<usize>, loop_mode: LoopMode ) -> Option<usize> {
        if self.working.is_empty() {
            return None;
        }

        let next = current.map_or( 0, |i| i + 1 );
        if next < self.working.len() {
            Some( next )
        } else if loop_mode == LoopMode::All {
            Some( 0 )
        } else {
            None
        }
    }


    /// Enables or disables shuffle using the thread-local RNG.
    pub fn set_shuffled( &mut self, shuffled: bool ) -> &[Arc<Track>] {
        self.set_shuffled_with( shuffled, &mut rand::thread_rng() )
    }


    /// Enables or disables shuffle.
    ///
    /// Shuffling always permutes the canonical order, never the current
    /// working order. Disabling restores the canonical order exactly,
    /// discarding any manual arrangement.
    pub fn set_shuffled_with<R: Rng + ?Sized>( &mut self, shuffled: bool, rng: &mut R ) -> &[Arc<Track>] {
        let mut order = self.canonical.clone();
        if shuffled {
            // Fisher-Yates
            order.shuffle( rng );
        }
        self.working = order;
        self.shuffled = shuffled;
        tracing::debug!( "Playlist shuffle set to {}", shuffled );
        &self.working
    }


    /// Replaces the working order wholesale.
    ///
    /// The canonical order is untouched, so a later unshuffle returns to the
    /// catalog arrangement rather than this one.
    pub fn reorder( &mut self, order: Vec<Arc<Track>> ) -> Result<&[Arc<Track>], PlaylistError> {
        if !self.is_permutation( &order ) {
            return Err( PlaylistError::NotAPermutation );
        }
        self.working = order;
        Ok( &self.working )
    }


    /// Moves a track from one position to another in the working order.
    pub fn move_track( &mut self, from: usize, to: usize ) -> Result<&[Arc<Track>], PlaylistError> {
        let len = self.working.len();
        for index in [ from, to ] {
            if index >= len {
                return Err( PlaylistError::OutOfRange { index, len } );
            }
        }

        let mut order = self.working.clone();
        let track = order.remove( from );
        order.insert( to, track );
        self.reorder( order )
    }


    /// Indices of the working order whose title or artist contains `term`, ignoring case.
    pub fn filter( &self, term: &str ) -> Vec<usize> {
        let needle = term.to_lowercase();
        self.working
            .iter()
            .enumerate()
            .filter( |( _, track )| track.matches( &needle ) )
            .map( |( i, _ )| i )
            .collect()
    }


    fn is_permutation( &self, order: &[Arc<Track>] ) -> bool {
        if order.len() != self.canonical.len() {
            return false;
        }

        let mut counts: HashMap<&str, isize> = HashMap::new();
        for track in &self.canonical {
            *counts.entry( track.id() ).or_default() += 1;
        }
        for track in order {
            match counts.get_mut( track.id() ) {
                Some( n ) => *n -= 1,
                None => return false,
            }
        }
        counts.values().all( |n| *n == 0 )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;


    fn tracks( n: usize ) -> Vec<Arc<Track>> {
        ( 0..n )
            .map( |i| Arc::new( Track::new(
                format!( "track-{}", i ),
                format!( "{}.mp3", i ),
                format!( "Song {}", i ),
                format!( "Artist {}", i % 2 ),
                None,
            )))
            .collect()
    }


    fn ids( tracks: &[Arc<Track>] ) -> Vec<String> {
        tracks.iter().map( |t| t.id().to_string() ).collect()
    }


    #[test]
    fn test_next_with_loop_all_wraps_only_at_end() {
        for n in 1..6 {
            let playlist = Playlist::new( tracks( n ) );
            for i in 0..n {
                let expected = if i == n - 1 { 0 } else { i + 1 };
                assert_eq!( playlist.next_track_index( Some( i ), LoopMode::All ), Some( expected ) );
            }
        }
    }


    #[test]
    fn test_next_with_loop_none_ends() {
        for n in 1..6 {
            let playlist = Playlist::new( tracks( n ) );
            assert_eq!( playlist.next_track_index( Some( n - 1 ), LoopMode::None ), None );
        }
    }


    #[test]
    fn test_next_ignores_loop_one() {
        let playlist = Playlist::new( tracks( 3 ) );
        assert_eq!( playlist.next_track_index( Some( 0 ), LoopMode::One ), Some( 1 ) );
        assert_eq!( playlist.next_track_index( Some( 2 ), LoopMode::One ), None );
    }


    #[test]
    fn test_next_on_empty_is_none() {
        let playlist = Playlist::new( Vec::new() );
        assert_eq!( playlist.next_track_index( None, LoopMode::All ), None );
        assert_eq!( playlist.next_track_index( Some( 0 ), LoopMode::All ), None );
    }


    #[test]
    fn test_single_track_loop_all_repeats_itself() {
        let playlist = Playlist::new( tracks( 1 ) );
        assert_eq!( playlist.next_track_index( Some( 0 ), LoopMode::All ), Some( 0 ) );
    }


    #[test]
    fn test_next_from_nothing_starts_at_zero() {
        let playlist = Playlist::new( tracks( 2 ) );
        assert_eq!( playlist.next_track_index( None, LoopMode::None ), Some( 0 ) );
    }


    #[test]
    fn test_shuffle_permutes_canonical_order() {
        let mut playlist = Playlist::new( tracks( 20 ) );
        let mut rng = StdRng::seed_from_u64( 7 );

        let first = ids( playlist.set_shuffled_with( true, &mut rng ) );
        let mut sorted = first.clone();
        sorted.sort();
        let mut canonical = ids( playlist.canonical() );
        canonical.sort();
        assert_eq!( sorted, canonical );
        assert!( playlist.is_shuffled() );
    }


    #[test]
    fn test_reshuffle_starts_from_canonical_order() {
        let mut a = Playlist::new( tracks( 12 ) );
        let mut b = Playlist::new( tracks( 12 ) );

        // Same seed: shuffling from the canonical order must yield the same
        // arrangement whether or not a shuffle was already applied.
        let mut rng = StdRng::seed_from_u64( 42 );
        a.set_shuffled_with( true, &mut rng );
        let mut rng = StdRng::seed_from_u64( 42 );
        let again = ids( a.set_shuffled_with( true, &mut rng ) );

        let mut rng = StdRng::seed_from_u64( 42 );
        let direct = ids( b.set_shuffled_with( true, &mut rng ) );

        assert_eq!( again, direct );
    }


    #[test]
    fn test_unshuffle_restores_canonical_after_manual_reorder() {
        let mut playlist = Playlist::new( tracks( 5 ) );
        let canonical = ids( playlist.canonical() );

        playlist.set_shuffled( true );
        playlist.move_track( 0, 4 ).unwrap();
        playlist.move_track( 3, 1 ).unwrap();

        let restored = ids( playlist.set_shuffled( false ) );
        assert_eq!( restored, canonical );
        assert!( !playlist.is_shuffled() );
    }


    #[test]
    fn test_reorder_rejects_foreign_sequence() {
        let mut playlist = Playlist::new( tracks( 3 ) );
        let mut other = tracks( 3 );
        other.pop();
        assert_eq!( playlist.reorder( other ).unwrap_err(), PlaylistError::NotAPermutation );

        let duplicate = vec![
            playlist.tracks()[ 0 ].clone(),
            playlist.tracks()[ 0 ].clone(),
            playlist.tracks()[ 1 ].clone(),
        ];
        assert_eq!( playlist.reorder( duplicate ).unwrap_err(), PlaylistError::NotAPermutation );
    }


    #[test]
    fn test_reorder_keeps_canonical() {
        let mut playlist = Playlist::new( tracks( 3 ) );
        let mut reversed = playlist.tracks().to_vec();
        reversed.reverse();
        playlist.reorder( reversed ).unwrap();

        assert_eq!( ids( playlist.tracks() ), vec![ "track-2", "track-1", "track-0" ] );
        assert_eq!( ids( playlist.canonical() ), vec![ "track-0", "track-1", "track-2" ] );
    }


    #[test]
    fn test_move_track_out_of_range() {
        let mut playlist = Playlist::new( tracks( 2 ) );
        assert_eq!(
            playlist.move_track( 0, 2 ).unwrap_err(),
            PlaylistError::OutOfRange { index: 2, len: 2 }
        );
    }


    #[test]
    fn test_filter_is_case_insensitive_and_pure() {
        let playlist = Playlist::new( tracks( 4 ) );
        assert_eq!( playlist.filter( "SONG 2" ), vec![ 2 ] );
        assert_eq!( playlist.filter( "artist 1" ), vec![ 1, 3 ] );
        assert_eq!( playlist.filter( "" ), vec![ 0, 1, 2, 3 ] );
        assert!( playlist.filter( "nothing" ).is_empty() );
        assert_eq!( playlist.len(), 4 );
    }


    #[test]
    fn test_position_of() {
        let mut playlist = Playlist::new( tracks( 3 ) );
        playlist.move_track( 2, 0 ).unwrap();
        assert_eq!( playlist.position_of( "track-2" ), Some( 0 ) );
        assert_eq!( playlist.position_of( "missing" ), None );
    }


    #[test]
    fn test_loop_mode_cycle() {
        let mut mode = LoopMode::None;
        let mut seen = Vec::new();
        for _ in 0..3 {
            mode = mode.next();
            seen.push( mode );
        }
        assert_eq!( seen, vec![ LoopMode::All, LoopMode::One, LoopMode::None ] );
    }
}
