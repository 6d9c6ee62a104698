//! Glob matching for `LIKE`: `*` matches any run of characters, `?` exactly
//! one. `\*` and `\?` match the literal character. Whole-string match.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Char(char),
    One,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    pieces: Vec<Piece>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        let mut pieces = Vec::new();
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            let piece = match c {
                '*' => {
                    if pieces.last() == Some(&Piece::Any) {
                        continue;
                    }
                    Piece::Any
                }
                '?' => Piece::One,
                '\\' => Piece::Char(chars.next().unwrap_or('\\')),
                c => Piece::Char(c),
            };
            pieces.push(piece);
        }
        Self {
            source: pattern.to_string(),
            pieces,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Iterative matcher; backtracks only to the most recent `*`, so the
    /// worst case is O(pattern * input).
    pub fn matches(&self, input: &str) -> bool {
        let text: Vec<char> = input.chars().collect();
        let (mut p, mut t) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.pieces.get(p) {
                Some(Piece::Char(c)) if *c == text[t] => {
                    p += 1;
                    t += 1;
                }
                Some(Piece::One) => {
                    p += 1;
                    t += 1;
                }
                Some(Piece::Any) => {
                    star = Some((p, t));
                    p += 1;
                }
                _ => match star {
                    Some((sp, st)) => {
                        p = sp + 1;
                        t = st + 1;
                        star = Some((sp, st + 1));
                    }
                    None => return false,
                },
            }
        }

        self.pieces[p..].iter().all(|piece| *piece == Piece::Any)
    }
}
