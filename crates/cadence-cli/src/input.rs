//! Text prompt for slash commands and search.


/// What the prompt line is collecting.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum InputMode {
    /// Keyboard shortcuts active.
    #[default]
    Normal,

    /// Typing a slash command.
    Command,

    /// Typing a live search term.
    Search,
}


impl InputMode {
    pub fn prefix( self ) -> &'static str {
        match self {
            InputMode::Normal => "",
            InputMode::Command => "/",
            InputMode::Search => "Search: ",
        }
    }
}


/// Single-line prompt with an append-only cursor at the end.
#[derive( Debug, Default )]
pub struct Prompt {
    mode: InputMode,
    text: String,
}


impl Prompt {
    /// Opens the prompt in `mode`, discarding any previous text.
    pub fn open( &mut self, mode: InputMode ) {
        self.mode = mode;
        self.text.clear();
    }


    /// Closes the prompt and returns what was typed.
    pub fn close( &mut self ) -> String {
        self.mode = InputMode::Normal;
        std::mem::take( &mut self.text )
    }


    pub fn mode( &self ) -> InputMode {
        self.mode
    }


    pub fn is_open( &self ) -> bool {
        self.mode != InputMode::Normal
    }


    pub fn text( &self ) -> &str {
        &self.text
    }


    pub fn push( &mut self, c: char ) {
        self.text.push( c );
    }


    /// Removes the last character. Returns `false` if there was nothing to remove.
    pub fn pop( &mut self ) -> bool {
        self.text.pop().is_some()
    }


    /// Removes the last word, like ctrl+w in a shell.
    pub fn pop_word( &mut self ) {
        let trimmed = self.text.trim_end().len();
        let start = self.text[ ..trimmed ]
            .rfind( char::is_whitespace )
            .map_or( 0, |i| i + 1 );
        self.text.truncate( start );
    }


    /// Display width of the rendered prompt line up to the cursor.
    pub fn cursor_column( &self ) -> usize {
        self.mode.prefix().chars().count() + self.text.chars().count()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_open_type_close() {
        let mut prompt = Prompt::default();
        assert!( !prompt.is_open() );

        prompt.open( InputMode::Command );
        "vol 40".chars().for_each( |c| prompt.push( c ) );
        assert_eq!( prompt.cursor_column(), 7 );
        assert_eq!( prompt.close(), "vol 40" );
        assert_eq!( prompt.mode(), InputMode::Normal );
        assert!( prompt.text().is_empty() );
    }


    #[test]
    fn test_pop_on_empty() {
        let mut prompt = Prompt::default();
        prompt.open( InputMode::Search );
        assert!( !prompt.pop() );
        prompt.push( 'é' );
        assert!( prompt.pop() );
    }


    #[test]
    fn test_pop_word() {
        let mut prompt = Prompt::default();
        prompt.open( InputMode::Command );
        "move 3 1".chars().for_each( |c| prompt.push( c ) );
        prompt.pop_word();
        assert_eq!( prompt.text(), "move 3 " );
        prompt.pop_word();
        prompt.pop_word();
        assert_eq!( prompt.text(), "" );
    }
}
