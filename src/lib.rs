//! Regular expressions over parametric finite alphabets, driven through
//! the classical conversion chain:
//!
//! ```text
//! regex text --> AST --> eps-NFA --> DFA --> minimal DFA --> { matcher, regex text }
//! ```
//!
//! # Architecture
//!
//! The pipeline is assembled from value-like phases, each producing the
//! next structure by a pure function:
//!
//! 1. [`Tokenizer`] scans a text regex lazily, left to right.
//! 2. [`Regex`] is a copy-on-write handle over a tagged AST, built by a
//!    recursive-descent parser for the infix grammar (where `+` is
//!    alternation) or by a stack evaluator for the classical postfix
//!    form ([`Regex::from_postfix`]).
//! 3. [`nfa_from_regex`] runs the Thompson construction, producing an
//!    [`Nfa`] with epsilon transitions;
//!    [`Nfa::remove_epsilon_transitions`] strips them in place.
//! 4. [`dfa_from_nfa`] runs the subset construction, producing a total
//!    [`Dfa`] (the dead state is explicit); [`minimize`] refines it to
//!    the minimal automaton.
//! 5. [`regex_from_dfa`] converts a DFA back into a [`Regex`] by state
//!    elimination, working on an auxiliary NFA over [`AnyAlphabet`]
//!    whose edge labels index a table of regex fragments.
//!
//! Everything is parameterized by an [`Alphabet`]: a finite symbol set
//! with a bijection between characters and ordinals `1..N`, where
//! ordinal 0 is reserved for the empty word ([`EPSILON`]).
//!
//! All iteration orders are deterministic (ordinals ascend, states keep
//! insertion order, label maps are sorted), so two runs over the same
//! input produce byte-identical dumps and regex text.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::marker::PhantomData;
use std::rc::Rc;

use log::debug;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// An error surfaced by the parsing entry points or by the DFA-to-regex
/// conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The input text is not a regex of the grammar: unbalanced
    /// brackets, a trailing escape, an out-of-alphabet letter, an
    /// unexpected token, or residue after a complete parse.
    Syntax,
    /// The automaton accepts no string at all; the grammar has no
    /// literal denoting the empty language, so no regex can be built.
    EmptyLanguage,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "malformed regular expression"),
            Self::EmptyLanguage => {
                write!(f, "automaton accepts the empty language")
            }
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Alphabets
// ---------------------------------------------------------------------------

/// A finite symbol set with an ordinal mapping.
///
/// Ordinal 0 is reserved for the empty-word marker ([`EPSILON`]); the
/// proper symbols occupy ordinals `1..SIZE`. [`Alphabet::ord`] returns
/// `None` for any character outside the alphabet, which the tokenizer
/// turns into a [`Token::Error`].
pub trait Alphabet {
    /// The character type. `char` for the text alphabets, `u64` for the
    /// opaque meta-alphabet.
    type Chr: Copy + Eq + fmt::Display;

    /// Number of ordinals, including the reserved ordinal 0.
    const SIZE: u64;

    /// Escape prefix emitted before characters that [`needs_escape`],
    /// if the alphabet has one.
    ///
    /// [`needs_escape`]: Alphabet::needs_escape
    const ESCAPE: Option<Self::Chr> = None;

    /// The character at ordinal `ord`. `chr(0)` is the empty sentinel.
    fn chr(ord: u64) -> Self::Chr;

    /// The ordinal of `chr`, or `None` when `chr` is not in the
    /// alphabet. `ord(chr(0)) == Some(0)`.
    fn ord(chr: Self::Chr) -> Option<u64>;

    /// Whether `chr` must be escaped when printed as a literal.
    fn needs_escape(_chr: Self::Chr) -> bool {
        false
    }
}

/// An alphabet whose regexes have a textual form.
///
/// Carries the reserved meta-characters recognized by the tokenizer and
/// emitted by the printer. [`AnyAlphabet`] deliberately does not
/// implement this: the meta-alphabet is never parsed or printed.
pub trait TextAlphabet: Alphabet<Chr = char> {
    /// The empty-word literal (`_` for the simple alphabets, `1` for
    /// the canonical one).
    const EMPTY_WORD: char;
    const KLEENE_STAR: char = '*';
    const QUESTION_MARK: char = '?';
    const ALTERNATE: char = '+';
    const LBRACKET: char = '(';
    const RBRACKET: char = ')';
    /// Explicit concatenation operator of the classical postfix form,
    /// when the alphabet reserves one.
    const CONCAT_DOT: Option<char> = None;

    /// Whether `chr` is skipped between tokens.
    fn is_space(chr: char) -> bool {
        chr == ' '
    }
}

/// Lowercase letters `'a'..` at ordinals `1..=N`, with `_` as the
/// empty-word token.
///
/// `N` is bounded by the 26 letters; the bound is enforced at compile
/// time through the evaluation of [`Alphabet::SIZE`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleAlphabet<const N: u64>;

impl<const N: u64> Alphabet for SimpleAlphabet<N> {
    type Chr = char;

    const SIZE: u64 = {
        assert!(N <= 26, "a simple alphabet covers at most a..z");
        N + 1
    };

    const ESCAPE: Option<char> = Some('\\');

    fn chr(ord: u64) -> char {
        debug_assert!(ord < Self::SIZE);
        if ord == 0 {
            '\0'
        } else {
            (b'a' + ord as u8 - 1) as char
        }
    }

    fn ord(chr: char) -> Option<u64> {
        if chr == '\0' {
            return Some(0);
        }
        let delta = (chr as u32).wrapping_sub('a' as u32) as u64;
        if delta < N {
            Some(delta + 1)
        } else {
            None
        }
    }

    fn needs_escape(chr: char) -> bool {
        matches!(chr, '(' | ')' | '\\' | '*' | '_' | '+' | '?')
    }
}

impl<const N: u64> TextAlphabet for SimpleAlphabet<N> {
    const EMPTY_WORD: char = '_';
}

/// The full byte range at ordinals `1..=255`, with the same meta
/// characters as [`SimpleAlphabet`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CharAlphabet;

impl Alphabet for CharAlphabet {
    type Chr = char;

    const SIZE: u64 = 256;

    const ESCAPE: Option<char> = Some('\\');

    fn chr(ord: u64) -> char {
        debug_assert!(ord < Self::SIZE);
        ord as u8 as char
    }

    fn ord(chr: char) -> Option<u64> {
        let code = chr as u32;
        if code < 256 {
            Some(code as u64)
        } else {
            None
        }
    }

    fn needs_escape(chr: char) -> bool {
        matches!(chr, '(' | ')' | '\\' | '*' | '_' | '+' | '?')
    }
}

impl TextAlphabet for CharAlphabet {
    const EMPTY_WORD: char = '_';
}

/// Lowercase letters like [`SimpleAlphabet`], but in the classical
/// textbook convention: `1` is the empty word, `_` is not reserved, and
/// `.` is the explicit concatenation operator of the postfix form.
#[derive(Clone, Copy, Debug, Default)]
pub struct CanonicalAlphabet<const N: u64>;

impl<const N: u64> Alphabet for CanonicalAlphabet<N> {
    type Chr = char;

    const SIZE: u64 = {
        assert!(N <= 26, "a canonical alphabet covers at most a..z");
        N + 1
    };

    const ESCAPE: Option<char> = Some('\\');

    fn chr(ord: u64) -> char {
        debug_assert!(ord < Self::SIZE);
        if ord == 0 {
            '\0'
        } else {
            (b'a' + ord as u8 - 1) as char
        }
    }

    fn ord(chr: char) -> Option<u64> {
        if chr == '\0' {
            return Some(0);
        }
        let delta = (chr as u32).wrapping_sub('a' as u32) as u64;
        if delta < N {
            Some(delta + 1)
        } else {
            None
        }
    }

    fn needs_escape(chr: char) -> bool {
        matches!(chr, '(' | ')' | '\\' | '*' | '+' | '?' | '.' | '1')
    }
}

impl<const N: u64> TextAlphabet for CanonicalAlphabet<N> {
    const EMPTY_WORD: char = '1';
    const CONCAT_DOT: Option<char> = Some('.');
}

/// Opaque 64-bit ordinals with no textual form.
///
/// Serves as the meta-alphabet during state elimination, where each
/// edge label is an index into a table of regex fragments. Never
/// parsed, printed, or used to key a DFA transition table.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyAlphabet;

impl Alphabet for AnyAlphabet {
    type Chr = u64;

    const SIZE: u64 = u64::MAX;

    fn chr(ord: u64) -> u64 {
        ord
    }

    fn ord(chr: u64) -> Option<u64> {
        Some(chr)
    }
}

/// Append `chr` to `out`, prefixed by the alphabet's escape character
/// when it is reserved.
fn push_escaped<A: Alphabet>(out: &mut String, chr: A::Chr) {
    if A::needs_escape(chr) {
        if let Some(esc) = A::ESCAPE {
            let _ = write!(out, "{esc}");
        }
    }
    let _ = write!(out, "{chr}");
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

/// A single lexeme of the regex grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    /// An out-of-alphabet character or a trailing escape.
    Error,
    /// End of input; repeats forever once reached.
    Eol,
    /// A literal symbol, stored by ordinal.
    Letter(u64),
    KleeneStar,
    QuestionMark,
    Alternate,
    LBracket,
    RBracket,
    /// The empty-word literal.
    Empty,
    /// The explicit concatenation operator of the postfix form. Only
    /// produced by alphabets with [`TextAlphabet::CONCAT_DOT`].
    Dot,
}

/// A lazy, cloneable cursor over the tokens of a regex string.
///
/// The current token is available through [`current`](Self::current)
/// without consuming it; [`advance`](Self::advance) moves to the next
/// one. Cloning is cheap, which is what the parser uses for
/// backtracking. Two cursors compare equal when they sit at the same
/// position; comparing cursors over different strings is a programming
/// error.
pub struct Tokenizer<'a, A: TextAlphabet> {
    src: &'a str,
    pos: usize,
    token: Token,
    _alphabet: PhantomData<A>,
}

impl<'a, A: TextAlphabet> Tokenizer<'a, A> {
    pub fn new(src: &'a str) -> Self {
        let mut tokenizer = Self {
            src,
            pos: 0,
            token: Token::Eol,
            _alphabet: PhantomData,
        };
        tokenizer.next_token();
        tokenizer
    }

    /// The token under the cursor.
    #[inline]
    pub fn current(&self) -> Token {
        self.token
    }

    /// Advance past the current token.
    pub fn advance(&mut self) {
        self.next_token();
    }

    #[inline]
    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_spaces(&mut self) {
        while let Some(chr) = self.peek_char() {
            if !A::is_space(chr) {
                break;
            }
            self.pos += chr.len_utf8();
        }
    }

    fn next_token(&mut self) {
        self.skip_spaces();

        let Some(chr) = self.peek_char() else {
            self.token = Token::Eol;
            return;
        };

        if Some(chr) == A::ESCAPE {
            let after = self.pos + chr.len_utf8();
            let Some(next) = self.src[after..].chars().next() else {
                // A trailing escape is an error; the cursor stays put so
                // the error token repeats on every further look.
                self.token = Token::Error;
                return;
            };
            self.pos = after + next.len_utf8();
            self.token = match A::ord(next) {
                Some(ord) => Token::Letter(ord),
                None => Token::Error,
            };
            return;
        }

        self.pos += chr.len_utf8();
        self.token = if chr == A::KLEENE_STAR {
            Token::KleeneStar
        } else if chr == A::QUESTION_MARK {
            Token::QuestionMark
        } else if chr == A::ALTERNATE {
            Token::Alternate
        } else if chr == A::LBRACKET {
            Token::LBracket
        } else if chr == A::RBRACKET {
            Token::RBracket
        } else if chr == A::EMPTY_WORD {
            Token::Empty
        } else if A::CONCAT_DOT == Some(chr) {
            Token::Dot
        } else {
            match A::ord(chr) {
                Some(ord) => Token::Letter(ord),
                None => Token::Error,
            }
        };
    }
}

impl<A: TextAlphabet> Clone for Tokenizer<'_, A> {
    fn clone(&self) -> Self {
        Self {
            src: self.src,
            pos: self.pos,
            token: self.token,
            _alphabet: PhantomData,
        }
    }
}

impl<A: TextAlphabet> PartialEq for Tokenizer<'_, A> {
    fn eq(&self, other: &Self) -> bool {
        debug_assert!(
            std::ptr::eq(self.src, other.src),
            "comparing tokenizers over different strings"
        );
        self.pos == other.pos
    }
}

impl<A: TextAlphabet> Eq for Tokenizer<'_, A> {}

impl<A: TextAlphabet> fmt::Debug for Tokenizer<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("pos", &self.pos)
            .field("token", &self.token)
            .finish()
    }
}

/// Yields every token up to (not including) [`Token::Eol`].
impl<A: TextAlphabet> Iterator for Tokenizer<'_, A> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.token == Token::Eol {
            return None;
        }
        let token = self.token;
        self.advance();
        Some(token)
    }
}

// ---------------------------------------------------------------------------
// Regex AST
// ---------------------------------------------------------------------------

/// Discriminant of an AST node, in precedence order.
///
/// The printer brackets a child whenever the child's kind is not
/// strictly below its parent's.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegexKind {
    Letter = 0,
    Empty,
    Kleene,
    Optional,
    Concat,
    Alternate,
}

/// A raw AST node. Concat and Alternate always hold at least two
/// children; smaller constructions collapse to the single child.
#[derive(Clone, Debug, PartialEq, Eq)]
enum RegexNode {
    Letter(u64),
    Empty,
    Kleene(Box<RegexNode>),
    Optional(Box<RegexNode>),
    Concat(Vec<RegexNode>),
    Alternate(Vec<RegexNode>),
}

impl RegexNode {
    fn kind(&self) -> RegexKind {
        match self {
            RegexNode::Letter(_) => RegexKind::Letter,
            RegexNode::Empty => RegexKind::Empty,
            RegexNode::Kleene(_) => RegexKind::Kleene,
            RegexNode::Optional(_) => RegexKind::Optional,
            RegexNode::Concat(_) => RegexKind::Concat,
            RegexNode::Alternate(_) => RegexKind::Alternate,
        }
    }
}

/// Destruction is iterative: children are drained into an explicit
/// worklist so a deeply nested regex cannot overflow the stack.
impl Drop for RegexNode {
    fn drop(&mut self) {
        if matches!(self, RegexNode::Letter(_) | RegexNode::Empty) {
            return;
        }
        let mut worklist = Vec::new();
        take_children(self, &mut worklist);
        while let Some(mut node) = worklist.pop() {
            take_children(&mut node, &mut worklist);
        }
    }
}

/// Move every direct child of `node` into `out`, leaving `node` flat.
fn take_children(node: &mut RegexNode, out: &mut Vec<RegexNode>) {
    match node {
        RegexNode::Kleene(sub) | RegexNode::Optional(sub) => {
            out.push(std::mem::replace(&mut **sub, RegexNode::Empty));
        }
        RegexNode::Concat(children) | RegexNode::Alternate(children) => {
            out.append(children);
        }
        RegexNode::Letter(_) | RegexNode::Empty => {}
    }
}

fn reverse_node(node: &mut RegexNode) {
    match node {
        RegexNode::Letter(_) | RegexNode::Empty => {}
        RegexNode::Kleene(sub) | RegexNode::Optional(sub) => reverse_node(sub),
        RegexNode::Concat(children) => {
            children.reverse();
            for sub in children {
                reverse_node(sub);
            }
        }
        RegexNode::Alternate(children) => {
            for sub in children {
                reverse_node(sub);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Regex handle (copy-on-write)
// ---------------------------------------------------------------------------

/// A refcounted, copy-on-write owner of a regex AST.
///
/// Cloning is cheap (a refcount bump). A handle is either *null*, the
/// [`Default`] state used as an accumulator seed by the combinator
/// loops, or owns exactly one AST root. Mutating operations deep-copy
/// the AST first whenever it is shared, so no two handles ever observe
/// each other's edits.
pub struct Regex<A: Alphabet> {
    node: Option<Rc<RegexNode>>,
    _alphabet: PhantomData<A>,
}

impl<A: Alphabet> Regex<A> {
    fn from_node(node: RegexNode) -> Self {
        Self {
            node: Some(Rc::new(node)),
            _alphabet: PhantomData,
        }
    }

    fn node(&self) -> Option<&RegexNode> {
        self.node.as_deref()
    }

    /// The empty-word regex.
    pub fn empty_string() -> Self {
        Self::from_node(RegexNode::Empty)
    }

    /// The single-letter regex for the symbol at ordinal `ord`.
    pub fn letter(ord: u64) -> Self {
        Self::from_node(RegexNode::Letter(ord))
    }

    /// The single-letter regex for `chr`, or `None` when `chr` is not a
    /// proper symbol of the alphabet.
    pub fn single_letter(chr: A::Chr) -> Option<Self> {
        match A::ord(chr) {
            Some(ord) if ord != 0 => Some(Self::letter(ord)),
            _ => None,
        }
    }

    /// Whether this handle owns no AST.
    pub fn is_null(&self) -> bool {
        self.node.is_none()
    }

    /// The kind of the root node, or `None` for a null handle.
    pub fn kind(&self) -> Option<RegexKind> {
        self.node().map(RegexNode::kind)
    }

    /// Shallow comparison: true when both handles share the same AST
    /// allocation (or both are null). This is the equality used by the
    /// state-elimination interner; use `==` for structural comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.node, &other.node) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Take sole ownership of the root, deep-copying when shared.
    fn take_node(&mut self) -> RegexNode {
        let rc = self.node.take().expect("operation on a null regex");
        Rc::try_unwrap(rc).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Append `other` to this regex as a concatenation.
    ///
    /// An Empty operand is an identity on either side: the non-empty
    /// side is kept as-is, sharing included. On a null handle the
    /// operand is simply installed. When the receiver is already a
    /// concatenation, the operand becomes one more child; otherwise a
    /// fresh two-child node is built.
    pub fn concat(&mut self, other: Self) -> &mut Self {
        let Some(rhs) = other.node else { return self };
        if matches!(self.node.as_deref(), None | Some(RegexNode::Empty)) {
            self.node = Some(rhs);
            return self;
        }
        if matches!(*rhs, RegexNode::Empty) {
            return self;
        }
        let rhs = Rc::try_unwrap(rhs).unwrap_or_else(|shared| (*shared).clone());
        let mut lhs = self.take_node();
        if let RegexNode::Concat(children) = &mut lhs {
            children.push(rhs);
        } else {
            lhs = RegexNode::Concat(vec![lhs, rhs]);
        }
        self.node = Some(Rc::new(lhs));
        self
    }

    /// Fold `other` into this regex as an alternation. Unlike
    /// [`concat`](Self::concat) there is no Empty shortcut: `X+_`
    /// keeps its empty branch.
    pub fn alternate(&mut self, other: Self) -> &mut Self {
        let Some(rhs) = other.node else { return self };
        if self.node.is_none() {
            self.node = Some(rhs);
            return self;
        }
        let rhs = Rc::try_unwrap(rhs).unwrap_or_else(|shared| (*shared).clone());
        let mut lhs = self.take_node();
        if let RegexNode::Alternate(children) = &mut lhs {
            children.push(rhs);
        } else {
            lhs = RegexNode::Alternate(vec![lhs, rhs]);
        }
        self.node = Some(Rc::new(lhs));
        self
    }

    /// Wrap this regex in a Kleene star.
    pub fn kleene(&mut self) -> &mut Self {
        let node = self.take_node();
        self.node = Some(Rc::new(RegexNode::Kleene(Box::new(node))));
        self
    }

    /// Wrap this regex in a `?` quantifier.
    pub fn optional(&mut self) -> &mut Self {
        let node = self.take_node();
        self.node = Some(Rc::new(RegexNode::Optional(Box::new(node))));
        self
    }

    /// Rewrite this regex to denote the reversed language: every
    /// concatenation runs its children in the opposite order.
    pub fn reverse(&mut self) -> &mut Self {
        let mut node = self.take_node();
        reverse_node(&mut node);
        self.node = Some(Rc::new(node));
        self
    }

    /// Parse the classical postfix (reverse Polish) form: letters and
    /// the empty word push operands, `*` and `?` wrap the top of the
    /// stack, the alternation token and the explicit concatenation dot
    /// combine the two topmost entries. `ab+*c.` reads as `(a+b)*c`.
    pub fn from_postfix(src: &str) -> Result<Self, Error>
    where
        A: TextAlphabet,
    {
        let mut cursor = Tokenizer::<A>::new(src);
        let mut stack: Vec<Self> = Vec::new();
        loop {
            let token = cursor.current();
            cursor.advance();
            match token {
                Token::Eol => break,
                Token::Letter(ord) => stack.push(Self::letter(ord)),
                Token::Empty => stack.push(Self::empty_string()),
                Token::KleeneStar => {
                    let mut regex = stack.pop().ok_or(Error::Syntax)?;
                    regex.kleene();
                    stack.push(regex);
                }
                Token::QuestionMark => {
                    let mut regex = stack.pop().ok_or(Error::Syntax)?;
                    regex.optional();
                    stack.push(regex);
                }
                Token::Alternate => {
                    let rhs = stack.pop().ok_or(Error::Syntax)?;
                    let mut lhs = stack.pop().ok_or(Error::Syntax)?;
                    lhs.alternate(rhs);
                    stack.push(lhs);
                }
                Token::Dot => {
                    let rhs = stack.pop().ok_or(Error::Syntax)?;
                    let mut lhs = stack.pop().ok_or(Error::Syntax)?;
                    lhs.concat(rhs);
                    stack.push(lhs);
                }
                Token::Error | Token::LBracket | Token::RBracket => {
                    return Err(Error::Syntax);
                }
            }
        }
        match (stack.pop(), stack.is_empty()) {
            (Some(regex), true) => Ok(regex),
            _ => Err(Error::Syntax),
        }
    }
}

impl<A: Alphabet> Clone for Regex<A> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            _alphabet: PhantomData,
        }
    }
}

impl<A: Alphabet> Default for Regex<A> {
    /// The null handle.
    fn default() -> Self {
        Self {
            node: None,
            _alphabet: PhantomData,
        }
    }
}

/// Structural equality of the underlying ASTs.
impl<A: Alphabet> PartialEq for Regex<A> {
    fn eq(&self, other: &Self) -> bool {
        self.node() == other.node()
    }
}

impl<A: Alphabet> Eq for Regex<A> {}

impl<A: Alphabet> fmt::Debug for Regex<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Regex").field(&self.node).finish()
    }
}

/// Prints the regex with minimum bracketing: a child is bracketed only
/// when its kind is not strictly below its parent's.
impl<A: TextAlphabet> fmt::Display for Regex<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            None => Ok(()),
            Some(node) => fmt_node::<A>(node, f),
        }
    }
}

fn fmt_node<A: TextAlphabet>(
    node: &RegexNode,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    match node {
        RegexNode::Letter(ord) => {
            let chr = A::chr(*ord);
            if A::needs_escape(chr) {
                if let Some(esc) = A::ESCAPE {
                    f.write_char(esc)?;
                }
            }
            f.write_char(chr)
        }
        RegexNode::Empty => f.write_char(A::EMPTY_WORD),
        RegexNode::Kleene(sub) => {
            fmt_child::<A>(sub, RegexKind::Kleene, f)?;
            f.write_char(A::KLEENE_STAR)
        }
        RegexNode::Optional(sub) => {
            fmt_child::<A>(sub, RegexKind::Optional, f)?;
            f.write_char(A::QUESTION_MARK)
        }
        RegexNode::Concat(children) => {
            for sub in children {
                fmt_child::<A>(sub, RegexKind::Concat, f)?;
            }
            Ok(())
        }
        RegexNode::Alternate(children) => {
            let mut first = true;
            for sub in children {
                if !first {
                    f.write_char(A::ALTERNATE)?;
                }
                first = false;
                fmt_node::<A>(sub, f)?;
            }
            Ok(())
        }
    }
}

fn fmt_child<A: TextAlphabet>(
    sub: &RegexNode,
    parent: RegexKind,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    if sub.kind() >= parent {
        f.write_char(A::LBRACKET)?;
        fmt_node::<A>(sub, f)?;
        f.write_char(A::RBRACKET)
    } else {
        fmt_node::<A>(sub, f)
    }
}

// ---------------------------------------------------------------------------
// Parser (recursive descent over the infix grammar)
// ---------------------------------------------------------------------------
//
// Regex ::= Alt
// Alt   ::= Cat ('+' Cat)*
// Cat   ::= Quant Quant*
// Quant ::= Simple ('*' | '?')?
// Simple::= '(' Regex ')' | Letter | Empty
//
// Each production either returns a node with the cursor advanced past
// it, or returns None with the cursor restored to its entry position.

impl<A: TextAlphabet> std::str::FromStr for Regex<A> {
    type Err = Error;

    /// Parses the infix grammar. Succeeds only when the whole input is
    /// consumed; an unbalanced bracket, a trailing escape and any
    /// residue all fail the parse.
    fn from_str(src: &str) -> Result<Self, Error> {
        let mut cursor = Tokenizer::<A>::new(src);
        let node = parse_alternate(&mut cursor).ok_or(Error::Syntax)?;
        if cursor.current() != Token::Eol {
            return Err(Error::Syntax);
        }
        Ok(Self::from_node(node))
    }
}

fn parse_alternate<A: TextAlphabet>(cursor: &mut Tokenizer<A>) -> Option<RegexNode> {
    let first = parse_concat(cursor)?;
    if cursor.current() != Token::Alternate {
        return Some(first);
    }
    let mut children = vec![first];
    let mut backup = cursor.clone();
    while cursor.current() == Token::Alternate {
        cursor.advance();
        let Some(sub) = parse_concat(cursor) else { break };
        children.push(sub);
        backup = cursor.clone();
    }
    // A trailing '+' without an operand is left unconsumed for the
    // caller to reject.
    *cursor = backup;
    if children.len() == 1 {
        children.pop()
    } else {
        Some(RegexNode::Alternate(children))
    }
}

fn parse_concat<A: TextAlphabet>(cursor: &mut Tokenizer<A>) -> Option<RegexNode> {
    let first = parse_quantified(cursor)?;
    let Some(second) = parse_quantified(cursor) else {
        return Some(first);
    };
    let mut children = vec![first, second];
    while let Some(sub) = parse_quantified(cursor) {
        children.push(sub);
    }
    Some(RegexNode::Concat(children))
}

fn parse_quantified<A: TextAlphabet>(cursor: &mut Tokenizer<A>) -> Option<RegexNode> {
    let backup = cursor.clone();
    let Some(node) = parse_simple(cursor) else {
        *cursor = backup;
        return None;
    };
    match cursor.current() {
        Token::QuestionMark => {
            cursor.advance();
            Some(RegexNode::Optional(Box::new(node)))
        }
        Token::KleeneStar => {
            cursor.advance();
            Some(RegexNode::Kleene(Box::new(node)))
        }
        _ => Some(node),
    }
}

fn parse_simple<A: TextAlphabet>(cursor: &mut Tokenizer<A>) -> Option<RegexNode> {
    if cursor.current() == Token::LBracket {
        let backup = cursor.clone();
        cursor.advance();
        let regex = parse_alternate(cursor);
        if cursor.current() != Token::RBracket {
            *cursor = backup;
            return None;
        }
        cursor.advance();
        return regex;
    }
    match cursor.current() {
        Token::Letter(ord) => {
            cursor.advance();
            Some(RegexNode::Letter(ord))
        }
        Token::Empty => {
            cursor.advance();
            Some(RegexNode::Empty)
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// State identifiers
// ---------------------------------------------------------------------------

/// The transition label reserved for the empty word.
pub const EPSILON: u64 = 0;

/// Index of a state in an [`Nfa`] or [`Dfa`].
///
/// [`StateId::ERROR`] is the explicit dead entry of DFA transition
/// rows; it never denotes a real state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u32);

impl StateId {
    /// Sentinel for "no transition" in DFA rows.
    pub const ERROR: StateId = StateId(u32::MAX);

    #[inline]
    fn new(idx: usize) -> Self {
        debug_assert!(idx < u32::MAX as usize);
        StateId(idx as u32)
    }

    /// The raw index. Must not be called on [`StateId::ERROR`].
    #[inline]
    fn idx(self) -> usize {
        debug_assert!(self != Self::ERROR, "StateId::ERROR used as an index");
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// NFA
// ---------------------------------------------------------------------------

/// A nondeterministic finite automaton with epsilon transitions.
///
/// States are a dense vector in creation order; a fresh automaton has
/// the single state 0, which is also the start. Per-state transitions
/// map each label ([`EPSILON`] or an alphabet ordinal, or a regex-table
/// index under [`AnyAlphabet`]) to the list of targets in insertion
/// order; the same (source, label, target) triple is never stored
/// twice. Combinators only ever append states, and consume their
/// second operand.
pub struct Nfa<A: Alphabet> {
    transitions: Vec<BTreeMap<u64, Vec<StateId>>>,
    finite: BTreeSet<StateId>,
    start: StateId,
    _alphabet: PhantomData<A>,
}

impl<A: Alphabet> Nfa<A> {
    pub fn new() -> Self {
        Self {
            transitions: vec![BTreeMap::new()],
            finite: BTreeSet::new(),
            start: StateId(0),
            _alphabet: PhantomData,
        }
    }

    /// Number of states.
    #[inline]
    pub fn size(&self) -> usize {
        self.transitions.len()
    }

    #[inline]
    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn set_start(&mut self, start: StateId) {
        debug_assert!(start.idx() < self.size());
        self.start = start;
    }

    /// Append a fresh state with no transitions.
    pub fn create_node(&mut self) -> StateId {
        self.transitions.push(BTreeMap::new());
        StateId::new(self.size() - 1)
    }

    pub fn make_finite(&mut self, node: StateId) {
        self.finite.insert(node);
    }

    pub fn is_finite(&self, node: StateId) -> bool {
        self.finite.contains(&node)
    }

    pub fn remove_finite(&mut self, node: StateId) {
        self.finite.remove(&node);
    }

    /// The outgoing transitions of `from`, keyed by label in ascending
    /// order.
    pub fn transitions(&self, from: StateId) -> &BTreeMap<u64, Vec<StateId>> {
        &self.transitions[from.idx()]
    }

    pub fn has_transition(&self, from: StateId, via: u64, to: StateId) -> bool {
        match self.transitions[from.idx()].get(&via) {
            Some(targets) => targets.contains(&to),
            None => false,
        }
    }

    /// Add the edge unless it is already present.
    pub fn add_transition(&mut self, from: StateId, via: u64, to: StateId) {
        if !self.has_transition(from, via, to) {
            self.transitions[from.idx()].entry(via).or_default().push(to);
        }
    }

    /// Remove one edge; the last target of the label slides into its
    /// slot. The (possibly empty) label entry is kept.
    pub fn remove_transition(&mut self, from: StateId, via: u64, to: StateId) {
        if let Some(targets) = self.transitions[from.idx()].get_mut(&via) {
            if let Some(at) = targets.iter().position(|&t| t == to) {
                targets.swap_remove(at);
            }
        }
    }

    /// The smallest label of an edge `from -> to`, if any exists.
    pub fn find_transition(&self, from: StateId, to: StateId) -> Option<u64> {
        for (&via, targets) in &self.transitions[from.idx()] {
            if targets.contains(&to) {
                return Some(via);
            }
        }
        None
    }

    /// Drop every outgoing edge of `from`.
    pub fn remove_transitions_from(&mut self, from: StateId) {
        self.transitions[from.idx()].clear();
    }

    fn validate(&self) {
        if cfg!(debug_assertions) {
            for row in &self.transitions {
                for targets in row.values() {
                    for to in targets {
                        debug_assert!(
                            to.idx() < self.size(),
                            "transition into a non-existent state"
                        );
                    }
                }
            }
        }
    }

    /// Shift every state index of `other` by `delta` and splice its
    /// transition rows onto the end of `self`.
    fn splice(&mut self, other: &mut Nfa<A>, delta: u32) {
        for row in &mut other.transitions {
            for targets in row.values_mut() {
                for to in targets {
                    *to = StateId(to.0 + delta);
                }
            }
        }
        other.start = StateId(other.start.0 + delta);
        self.transitions.append(&mut other.transitions);
    }

    /// Thompson concatenation: every accepting state of `self` gains an
    /// epsilon edge to `other`'s start, and `other`'s accepting states
    /// (relabeled) become the accepting set.
    pub fn concat(&mut self, mut other: Nfa<A>) {
        self.validate();
        other.validate();
        let delta = self.size() as u32;
        self.splice(&mut other, delta);
        let other_start = other.start;
        for node in std::mem::take(&mut self.finite) {
            self.add_transition(node, EPSILON, other_start);
        }
        self.finite = other.finite.iter().map(|n| StateId(n.0 + delta)).collect();
        self.validate();
    }

    /// Thompson alternation: a fresh start forks into both old starts,
    /// and a fresh state collecting both accepting sets becomes the
    /// unique accepting state.
    pub fn alternate(&mut self, mut other: Nfa<A>) {
        self.validate();
        other.validate();
        let delta = self.size() as u32;
        self.splice(&mut other, delta);
        let other_start = other.start;

        let new_start = self.create_node();
        self.add_transition(new_start, EPSILON, self.start);
        self.add_transition(new_start, EPSILON, other_start);
        self.start = new_start;

        let new_term = self.create_node();
        for node in std::mem::take(&mut self.finite) {
            self.add_transition(node, EPSILON, new_term);
        }
        for node in &other.finite {
            self.add_transition(StateId(node.0 + delta), EPSILON, new_term);
        }
        self.make_finite(new_term);
        self.validate();
    }

    /// Thompson star: a fresh state becomes both the start and the sole
    /// accepting state, with epsilon edges into the old start and back
    /// from every old accepting state.
    pub fn kleene(&mut self) {
        let new_start = self.create_node();
        self.add_transition(new_start, EPSILON, self.start);
        for node in self.finite.clone() {
            self.add_transition(node, EPSILON, new_start);
        }
        self.start = new_start;
        self.make_finite(self.start);
        self.validate();
    }

    /// Thompson option: a fresh accepting start with an epsilon edge to
    /// the old start; the old accepting states stay accepting.
    pub fn optional(&mut self) {
        let new_start = self.create_node();
        self.add_transition(new_start, EPSILON, self.start);
        self.start = new_start;
        self.make_finite(self.start);
        self.validate();
    }

    /// Eliminate every epsilon transition in place.
    ///
    /// Each state borrows the accepting flag and the non-epsilon
    /// transitions of its epsilon closure (the state itself excluded),
    /// then drops its epsilon edges; a final sweep prunes states no
    /// longer reachable from the start. States are processed in index
    /// order, which keeps the result deterministic.
    pub fn remove_epsilon_transitions(&mut self) -> &mut Self {
        for idx in 0..self.size() {
            let node = StateId::new(idx);

            let mut reachable = BTreeSet::new();
            let mut worklist = vec![node];
            while let Some(via) = worklist.pop() {
                if !reachable.insert(via) {
                    continue;
                }
                if let Some(targets) = self.transitions[via.idx()].get(&EPSILON) {
                    worklist.extend(targets.iter().copied());
                }
            }
            reachable.remove(&node);

            for via in reachable {
                if self.finite.contains(&via) {
                    self.finite.insert(node);
                }
                let borrowed: Vec<(u64, Vec<StateId>)> = self.transitions[via.idx()]
                    .iter()
                    .filter(|&(&label, _)| label != EPSILON)
                    .map(|(&label, targets)| (label, targets.clone()))
                    .collect();
                for (label, targets) in borrowed {
                    for to in targets {
                        self.add_transition(node, label, to);
                    }
                }
            }

            self.transitions[idx].remove(&EPSILON);
        }
        debug!("epsilon elimination done over {} states", self.size());
        self.optimize_unreachable();
        self.validate();
        self
    }

    /// Clear the transitions and accepting flags of every state that
    /// the start state cannot reach.
    pub fn optimize_unreachable(&mut self) {
        let mut reachable = vec![false; self.size()];
        let mut worklist = vec![self.start];
        while let Some(node) = worklist.pop() {
            if reachable[node.idx()] {
                continue;
            }
            reachable[node.idx()] = true;
            for targets in self.transitions[node.idx()].values() {
                worklist.extend(targets.iter().copied());
            }
        }
        for idx in 0..self.size() {
            if !reachable[idx] {
                self.finite.remove(&StateId::new(idx));
                self.transitions[idx].clear();
            }
        }
    }

    /// Delete every edge into a state from which no accepting state is
    /// reachable.
    pub fn prune_dead_states(&mut self) {
        let mut incoming: Vec<Vec<StateId>> = vec![Vec::new(); self.size()];
        for (idx, row) in self.transitions.iter().enumerate() {
            for targets in row.values() {
                for to in targets {
                    incoming[to.idx()].push(StateId::new(idx));
                }
            }
        }

        let mut alive = vec![false; self.size()];
        let mut worklist: Vec<StateId> = self.finite.iter().copied().collect();
        while let Some(node) = worklist.pop() {
            if alive[node.idx()] {
                continue;
            }
            alive[node.idx()] = true;
            worklist.extend(incoming[node.idx()].iter().copied());
        }

        for row in &mut self.transitions {
            for targets in row.values_mut() {
                targets.retain(|to| alive[to.idx()]);
            }
        }
    }

    /// The stable textual dump: start state, blank line, accepting
    /// states one per line, blank line, then one `"src dst chr"` line
    /// per edge in (state, label, insertion) order. Epsilon edges print
    /// only `"src dst "` with no character and no line break.
    pub fn text_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.start);
        out.push('\n');
        for node in &self.finite {
            let _ = writeln!(out, "{node}");
        }
        out.push('\n');
        for (idx, row) in self.transitions.iter().enumerate() {
            for (&label, targets) in row {
                for to in targets {
                    let _ = write!(out, "{idx} {to} ");
                    if label != EPSILON {
                        push_escaped::<A>(&mut out, A::chr(label));
                        out.push('\n');
                    }
                }
            }
        }
        out.push('\n');
        out
    }

    /// Graphviz rendering of the same graph; epsilon edges carry an
    /// empty-string label.
    pub fn to_dot(&self) -> String {
        let mut out = String::from(
            "digraph nfa {\n\
             fontname=\"Helvetica,Arial,sans-serif\"\n\
             node [fontname=\"Helvetica,Arial,sans-serif\"]\n\
             edge [fontname=\"Helvetica,Arial,sans-serif\"]\n\
             rankdir=LR;\n\
             S [style = invis];\
             node [shape = doublecircle];\n",
        );
        if !self.finite.is_empty() {
            for node in &self.finite {
                let _ = write!(out, "{node} ");
            }
            out.push_str(";\n");
        }
        out.push_str("node [shape = circle];\n");
        let _ = writeln!(out, "S -> {}", self.start);
        for (idx, row) in self.transitions.iter().enumerate() {
            for (&label, targets) in row {
                for to in targets {
                    let _ = write!(out, "{idx} -> {to}[label=\"");
                    if label != EPSILON {
                        push_escaped::<A>(&mut out, A::chr(label));
                    } else {
                        out.push_str("\\\"\\\"");
                    }
                    out.push_str("\"];\n");
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

impl<A: Alphabet> Default for Nfa<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Alphabet> Clone for Nfa<A> {
    fn clone(&self) -> Self {
        Self {
            transitions: self.transitions.clone(),
            finite: self.finite.clone(),
            start: self.start,
            _alphabet: PhantomData,
        }
    }
}

impl<A: Alphabet> fmt::Debug for Nfa<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nfa")
            .field("start", &self.start)
            .field("finite", &self.finite)
            .field("transitions", &self.transitions)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DFA
// ---------------------------------------------------------------------------

/// A deterministic finite automaton with a total transition relation.
///
/// Every state owns a row of `A::SIZE` entries indexed by ordinal;
/// entry 0 is unused (it was the epsilon label of the NFA) and a
/// [`StateId::ERROR`] entry is the explicit dead transition. A fresh
/// automaton has the single state 0 with an all-dead row.
pub struct Dfa<A: Alphabet> {
    transitions: Vec<Box<[StateId]>>,
    finite: BTreeSet<StateId>,
    start: StateId,
    _alphabet: PhantomData<A>,
}

impl<A: Alphabet> Dfa<A> {
    pub fn new() -> Self {
        Self {
            transitions: vec![Self::blank_row()],
            finite: BTreeSet::new(),
            start: StateId(0),
            _alphabet: PhantomData,
        }
    }

    fn blank_row() -> Box<[StateId]> {
        vec![StateId::ERROR; A::SIZE as usize].into_boxed_slice()
    }

    /// Number of states.
    #[inline]
    pub fn size(&self) -> usize {
        self.transitions.len()
    }

    #[inline]
    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn set_start(&mut self, start: StateId) {
        debug_assert!(start.idx() < self.size());
        self.start = start;
    }

    /// Append a fresh state with an all-dead row.
    pub fn create_node(&mut self) -> StateId {
        self.transitions.push(Self::blank_row());
        StateId::new(self.size() - 1)
    }

    pub fn make_finite(&mut self, node: StateId) {
        self.finite.insert(node);
    }

    pub fn is_finite(&self, node: StateId) -> bool {
        self.finite.contains(&node)
    }

    pub fn remove_finite(&mut self, node: StateId) {
        self.finite.remove(&node);
    }

    /// The transition row of `from`, indexed by ordinal.
    pub fn transitions(&self, from: StateId) -> &[StateId] {
        &self.transitions[from.idx()]
    }

    pub fn has_transition(&self, from: StateId, via: u64, to: StateId) -> bool {
        self.transitions[from.idx()][via as usize] == to
    }

    pub fn set_transition(&mut self, from: StateId, via: u64, to: StateId) {
        debug_assert!((via as usize) < A::SIZE as usize);
        self.transitions[from.idx()][via as usize] = to;
    }

    pub fn remove_transition(&mut self, from: StateId, via: u64) {
        self.transitions[from.idx()][via as usize] = StateId::ERROR;
    }

    /// Swap the accepting and non-accepting state sets in place; the
    /// transitions are untouched. Involutive.
    pub fn inverse(&mut self) {
        let finite = std::mem::take(&mut self.finite);
        self.finite = (0..self.size())
            .map(StateId::new)
            .filter(|node| !finite.contains(node))
            .collect();
    }

    /// Walk the automaton over `input` and report whether it stops in
    /// an accepting state having consumed everything.
    pub fn accepts<I>(&self, input: I) -> bool
    where
        I: IntoIterator<Item = A::Chr>,
    {
        let mut state = self.start;
        for chr in input {
            let Some(ord) = A::ord(chr) else { return false };
            let to = self.transitions[state.idx()][ord as usize];
            if to == StateId::ERROR {
                return false;
            }
            state = to;
        }
        self.is_finite(state)
    }

    /// Length of the longest prefix of `input` the automaton accepts.
    ///
    /// The walk starts at the start state and stops at the first dead
    /// transition or out-of-alphabet character; every visit to an
    /// accepting state records the position reached so far. Returns 0
    /// when no accepting state is ever visited.
    pub fn longest_match<I>(&self, input: I) -> usize
    where
        I: IntoIterator<Item = A::Chr>,
    {
        let mut state = self.start;
        let mut best = 0;
        let mut pos = 0;
        for chr in input {
            let Some(ord) = A::ord(chr) else { break };
            let to = self.transitions[state.idx()][ord as usize];
            if to == StateId::ERROR {
                break;
            }
            state = to;
            pos += 1;
            if self.is_finite(state) {
                best = pos;
            }
        }
        best
    }

    /// The stable textual dump, in the same layout as
    /// [`Nfa::text_dump`]: one `"src dst chr"` line per live edge, in
    /// (state, ordinal) order.
    pub fn text_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.start);
        out.push('\n');
        for node in &self.finite {
            let _ = writeln!(out, "{node}");
        }
        out.push('\n');
        for (idx, row) in self.transitions.iter().enumerate() {
            for via in 1..A::SIZE {
                let to = row[via as usize];
                if to != StateId::ERROR {
                    let _ = write!(out, "{idx} {to} ");
                    push_escaped::<A>(&mut out, A::chr(via));
                    out.push('\n');
                }
            }
        }
        out.push('\n');
        out
    }

    /// Graphviz rendering of the same graph.
    pub fn to_dot(&self) -> String {
        let mut out = String::from(
            "digraph dfa {\n\
             fontname=\"Helvetica,Arial,sans-serif\"\n\
             node [fontname=\"Helvetica,Arial,sans-serif\"]\n\
             edge [fontname=\"Helvetica,Arial,sans-serif\"]\n\
             rankdir=LR;\n\
             S [style = invis];\
             node [shape = doublecircle];\n",
        );
        if !self.finite.is_empty() {
            for node in &self.finite {
                let _ = write!(out, "{node} ");
            }
            out.push_str(";\n");
        }
        out.push_str("node [shape = circle];\n");
        let _ = writeln!(out, "S -> {}", self.start);
        for (idx, row) in self.transitions.iter().enumerate() {
            for via in 1..A::SIZE {
                let to = row[via as usize];
                if to != StateId::ERROR {
                    let _ = write!(out, "{idx} -> {to}[label=\"");
                    push_escaped::<A>(&mut out, A::chr(via));
                    out.push_str("\"];\n");
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

impl<A: Alphabet> Default for Dfa<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Alphabet> Clone for Dfa<A> {
    fn clone(&self) -> Self {
        Self {
            transitions: self.transitions.clone(),
            finite: self.finite.clone(),
            start: self.start,
            _alphabet: PhantomData,
        }
    }
}

impl<A: Alphabet> fmt::Debug for Dfa<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dfa")
            .field("start", &self.start)
            .field("finite", &self.finite)
            .field("transitions", &self.transitions)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

use indexmap::IndexSet;

/// Thompson construction: build an epsilon-NFA accepting the language
/// of `regex`. A null handle yields the automaton of the empty
/// language.
pub fn nfa_from_regex<A: Alphabet>(regex: &Regex<A>) -> Nfa<A> {
    match regex.node() {
        None => Nfa::new(),
        Some(node) => nfa_from_node::<A>(node),
    }
}

fn nfa_from_node<A: Alphabet>(node: &RegexNode) -> Nfa<A> {
    match node {
        RegexNode::Empty => {
            let mut nfa = Nfa::new();
            let accept = nfa.create_node();
            nfa.add_transition(nfa.start(), EPSILON, accept);
            nfa.make_finite(accept);
            nfa
        }
        RegexNode::Letter(ord) => {
            let mut nfa = Nfa::new();
            let accept = nfa.create_node();
            nfa.add_transition(nfa.start(), *ord, accept);
            nfa.make_finite(accept);
            nfa
        }
        RegexNode::Kleene(sub) => {
            let mut nfa = nfa_from_node::<A>(sub);
            nfa.kleene();
            nfa
        }
        RegexNode::Optional(sub) => {
            let mut nfa = nfa_from_node::<A>(sub);
            nfa.optional();
            nfa
        }
        RegexNode::Alternate(children) => {
            let Some((first, rest)) = children.split_first() else {
                unreachable!("alternation node without children");
            };
            let mut nfa = nfa_from_node::<A>(first);
            for sub in rest {
                nfa.alternate(nfa_from_node::<A>(sub));
            }
            nfa
        }
        RegexNode::Concat(children) => {
            let Some((first, rest)) = children.split_first() else {
                unreachable!("concatenation node without children");
            };
            let mut nfa = nfa_from_node::<A>(first);
            for sub in rest {
                nfa.concat(nfa_from_node::<A>(sub));
            }
            nfa
        }
    }
}

/// Subset construction: determinize an (ordinarily epsilon-free) NFA
/// into a total DFA.
///
/// Each DFA state stands for a sorted set of NFA states, starting from
/// `{nfa.start}`; sets are interned in first-seen order, so the empty
/// set becomes an ordinary dead state with all-self rows and the result
/// is total without any [`StateId::ERROR`] entry. A DFA state accepts
/// when any of its members does.
pub fn dfa_from_nfa<A: Alphabet>(nfa: &Nfa<A>) -> Dfa<A> {
    let mut dfa = Dfa::new();
    let mut vertices: IndexSet<Box<[StateId]>> = IndexSet::new();
    vertices.insert(vec![nfa.start()].into_boxed_slice());

    let mut idx = 0;
    while idx < vertices.len() {
        let members = vertices[idx].clone();
        for via in 1..A::SIZE {
            let mut union = Vec::new();
            for &node in members.iter() {
                if let Some(targets) = nfa.transitions(node).get(&via) {
                    union.extend_from_slice(targets);
                }
            }
            union.sort_unstable();
            union.dedup();
            let (pos, inserted) = vertices.insert_full(union.into_boxed_slice());
            if inserted {
                dfa.create_node();
            }
            dfa.set_transition(StateId::new(idx), via, StateId::new(pos));
        }
        for &node in members.iter() {
            if nfa.is_finite(node) {
                dfa.make_finite(StateId::new(idx));
            }
        }
        idx += 1;
    }

    debug!(
        "subset construction: {} NFA states -> {} DFA states",
        nfa.size(),
        dfa.size()
    );
    dfa
}

/// Partition refinement: build the minimal DFA equivalent to `dfa`.
///
/// States start in two classes keyed by their accepting flag. Each pass
/// walks the input states in index order and splits a class whenever a
/// member's transition signature (per-ordinal class of the target)
/// disagrees with the row already written for that class; the pass
/// repeats until no new class appears. The class count never shrinks
/// and is bounded by the input size, so the sweep terminates.
pub fn minimize<A: Alphabet>(dfa: &Dfa<A>) -> Dfa<A> {
    let mut min = Dfa::new();
    min.create_node();
    // Seed state 1 is the accepting class; leave it non-accepting when
    // the input has no accepting state at all, so the phantom class
    // cannot leak into the dump.
    if !dfa.finite.is_empty() {
        min.make_finite(StateId(1));
    }

    let mut classes: Vec<StateId> = (0..dfa.size())
        .map(|idx| StateId(dfa.is_finite(StateId::new(idx)) as u32))
        .collect();
    min.set_start(classes[dfa.start().idx()]);

    // The explicit dead entry has no class of its own; it stays dead in
    // every signature.
    fn class_of(classes: &[StateId], to: StateId) -> StateId {
        if to == StateId::ERROR {
            StateId::ERROR
        } else {
            classes[to.idx()]
        }
    }

    let mut passes = 0u32;
    let mut added_new_class = true;
    while added_new_class {
        added_new_class = false;
        passes += 1;
        let mut new_classes = classes.clone();
        let mut inited = vec![false; min.size()];

        for idx in 0..classes.len() {
            let class = classes[idx];
            let row = dfa.transitions(StateId::new(idx));

            if !inited[class.idx()] {
                inited[class.idx()] = true;
                for via in 1..A::SIZE {
                    min.set_transition(class, via, class_of(&classes, row[via as usize]));
                }
                continue;
            }

            let mut signature = Dfa::<A>::blank_row();
            for via in 1..A::SIZE {
                signature[via as usize] = class_of(&classes, row[via as usize]);
            }
            if &*signature == min.transitions(class) {
                continue;
            }

            let mut twin = None;
            for other in 0..idx {
                if classes[other] != class {
                    continue;
                }
                if min.transitions(new_classes[other]) == &*signature {
                    twin = Some(new_classes[other]);
                    break;
                }
            }
            match twin {
                Some(found) => new_classes[idx] = found,
                None => {
                    let fresh = min.create_node();
                    if min.is_finite(class) {
                        min.make_finite(fresh);
                    }
                    for via in 1..A::SIZE {
                        min.set_transition(fresh, via, signature[via as usize]);
                    }
                    new_classes[idx] = fresh;
                    added_new_class = true;
                }
            }
        }
        classes = new_classes;
    }

    debug!(
        "minimization: {} -> {} states in {} passes",
        dfa.size(),
        min.size(),
        passes
    );
    min
}

// ---------------------------------------------------------------------------
// State elimination (DFA -> regex)
// ---------------------------------------------------------------------------

/// Return the table index of `regex`, appending it when absent.
///
/// The search uses shallow ([`Regex::ptr_eq`]) equality: a combo that
/// is an untouched clone of a table entry resolves to that entry, any
/// freshly built AST gets a fresh label.
fn intern<A: Alphabet>(table: &mut Vec<Regex<A>>, regex: Regex<A>) -> u64 {
    for (idx, entry) in table.iter().enumerate() {
        if entry.ptr_eq(&regex) {
            return idx as u64;
        }
    }
    table.push(regex);
    (table.len() - 1) as u64
}

/// Convert a total DFA back into a regex by state elimination.
///
/// The work happens on a "regex NFA" over [`AnyAlphabet`] whose labels
/// index a table of regex fragments: label 0 is the empty word, labels
/// `1..N` the single letters, higher labels the compounds interned
/// while eliminating. The automaton mirrors the DFA plus one fresh
/// accepting state `T` fed by an empty-word edge from every accepting
/// DFA state. Intermediate states are eliminated in ascending index
/// order, skipping the start state and `T`: self-loops collapse into a
/// starred prefix first, then every predecessor is rewired across the
/// state, folding parallel edges into one alternation. What remains is
/// a possible self-loop bundle on the start plus a single edge to `T`,
/// which reads off as `(loops)* . bridge`.
///
/// Fails with [`Error::EmptyLanguage`] when no accepting state is
/// reachable: the grammar cannot denote the empty language.
pub fn regex_from_dfa<A: Alphabet>(dfa: &Dfa<A>) -> Result<Regex<A>, Error> {
    let mut table: Vec<Regex<A>> = Vec::new();
    table.push(Regex::empty_string());
    for ord in 1..A::SIZE {
        table.push(Regex::letter(ord));
    }

    let mut graph: Nfa<AnyAlphabet> = Nfa::new();
    for _ in 1..dfa.size() {
        graph.create_node();
    }
    for from in 0..dfa.size() {
        let row = dfa.transitions(StateId::new(from));
        for via in 1..A::SIZE {
            let to = row[via as usize];
            if to != StateId::ERROR {
                graph.add_transition(StateId::new(from), via, to);
            }
        }
    }
    graph.set_start(dfa.start());
    let term = graph.create_node();
    graph.make_finite(term);
    for node in 0..dfa.size() {
        if dfa.is_finite(StateId::new(node)) {
            graph.add_transition(StateId::new(node), EPSILON, term);
        }
    }

    graph.prune_dead_states();

    // Self-loop labels and incoming non-loop edges, per state. Both are
    // kept in step with the transition map for the rest of the run.
    let mut loops: Vec<Vec<u64>> = vec![Vec::new(); graph.size()];
    let mut incoming: Vec<Vec<(u64, StateId)>> = vec![Vec::new(); graph.size()];
    for idx in 0..graph.size() {
        let node = StateId::new(idx);
        for (&label, targets) in graph.transitions(node) {
            for &to in targets {
                if to == node {
                    loops[idx].push(label);
                } else {
                    incoming[to.idx()].push((label, node));
                }
            }
        }
    }

    for idx in 0..graph.size() {
        let via = StateId::new(idx);
        if via == graph.start() || graph.is_finite(via) {
            continue;
        }

        let mut loop_regex: Regex<A> = Regex::default();
        let has_loop = !loops[idx].is_empty();
        if has_loop {
            for &label in &loops[idx] {
                loop_regex.alternate(table[label as usize].clone());
            }
            loop_regex.kleene();
        }

        let outgoing: Vec<(u64, StateId)> = graph
            .transitions(via)
            .iter()
            .flat_map(|(&label, targets)| targets.iter().map(move |&to| (label, to)))
            .collect();

        for (from_label, from) in std::mem::take(&mut incoming[idx]) {
            debug_assert!(from != via);
            // Predecessors below `via` (other than the start) are stale
            // entries left behind by their own elimination round.
            if from < via && from != graph.start() {
                continue;
            }

            for &(to_label, to) in &outgoing {
                if to == via {
                    continue;
                }

                let mut combo = table[from_label as usize].clone();
                if has_loop {
                    combo.concat(loop_regex.clone());
                }
                combo.concat(table[to_label as usize].clone());

                if to != from {
                    // Fold every parallel `from -> to` edge into the
                    // combo before the rewired edge replaces them.
                    while let Some(label) = graph.find_transition(from, to) {
                        graph.remove_transition(from, label, to);
                        combo.alternate(table[label as usize].clone());
                    }
                    incoming[to.idx()].retain(|&(_, src)| src != from);
                }

                let label = intern(&mut table, combo);
                graph.add_transition(from, label, to);
                if to == from {
                    loops[to.idx()].push(label);
                } else {
                    incoming[to.idx()].push((label, from));
                }
            }
        }
        graph.remove_transitions_from(via);
    }

    let start = graph.start();
    let mut result: Regex<A> = Regex::default();
    if !loops[start.idx()].is_empty() {
        for &label in &loops[start.idx()] {
            result.alternate(table[label as usize].clone());
        }
        result.kleene();
    }
    let bridge = graph
        .find_transition(start, term)
        .ok_or(Error::EmptyLanguage)?;
    result.concat(table[bridge as usize].clone());

    debug!(
        "state elimination: {} interned fragments over {} states",
        table.len(),
        graph.size()
    );
    Ok(result)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Parse, determinize and minimize in one go: the minimal DFA of
/// `regex`.
pub fn mdfa_from_regex<A: Alphabet>(regex: &Regex<A>) -> Dfa<A> {
    let mut nfa = nfa_from_regex(regex);
    nfa.remove_epsilon_transitions();
    minimize(&dfa_from_nfa(&nfa))
}

/// Length of the longest prefix of `input` matched by `pattern`.
///
/// The pattern is read in the infix grammar first; when that fails it
/// is retried as the classical postfix form (so canonical-alphabet
/// patterns like `ab+*c.` work out of the box). The composed pipeline
/// is parse, Thompson construction, epsilon elimination, subset
/// construction, minimization, then the DFA walk.
pub fn max_match<A: TextAlphabet>(pattern: &str, input: &str) -> Result<usize, Error> {
    let regex: Regex<A> = pattern
        .parse()
        .or_else(|_| Regex::from_postfix(pattern))?;
    let dfa = mdfa_from_regex(&regex);
    Ok(dfa.longest_match(input.chars()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type Ab = SimpleAlphabet<2>;
    type Can3 = CanonicalAlphabet<3>;

    fn parse(src: &str) -> Regex<Ab> {
        src.parse().expect("pattern should parse")
    }

    /// Every word over {a, b} of length at most `max_len`, shortest
    /// first.
    fn words(max_len: usize) -> Vec<String> {
        let mut all = vec![String::new()];
        let mut frontier = vec![String::new()];
        for _ in 0..max_len {
            let mut next = Vec::new();
            for word in &frontier {
                for chr in ['a', 'b'] {
                    let mut longer = word.clone();
                    longer.push(chr);
                    next.push(longer);
                }
            }
            all.extend(next.iter().cloned());
            frontier = next;
        }
        all
    }

    // -----------------------------------------------------------------------
    // Alphabet unit tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_simple_alphabet_chr() {
        assert_eq!(Ab::chr(1), 'a');
        assert_eq!(Ab::chr(2), 'b');
        assert_eq!(Ab::chr(0), '\0');
    }

    #[test]
    fn test_simple_alphabet_ord() {
        assert_eq!(Ab::ord('\0'), Some(0));
        assert_eq!(Ab::ord('a'), Some(1));
        assert_eq!(Ab::ord('b'), Some(2));
        assert_eq!(Ab::ord('c'), None);
        assert_eq!(Ab::ord('*'), None);
    }

    #[test]
    fn test_simple_alphabet_is_space() {
        assert!(Ab::is_space(' '));
        assert!(!Ab::is_space('a'));
    }

    #[test]
    fn test_simple_alphabet_needs_escape() {
        for chr in ['\\', '?', '*', '+', ')', '(', '_'] {
            assert!(Ab::needs_escape(chr), "{chr:?} should need an escape");
        }
        assert!(!Ab::needs_escape('a'));
        assert!(!Ab::needs_escape('1'));
    }

    #[test]
    fn test_char_alphabet_roundtrip() {
        assert_eq!(CharAlphabet::chr('a' as u64), 'a');
        assert_eq!(CharAlphabet::chr(0), '\0');
        assert_eq!(CharAlphabet::ord('\0'), Some(0));
        assert_eq!(CharAlphabet::ord('a'), Some(97));
        assert_eq!(CharAlphabet::ord('\u{1F600}'), None);
    }

    #[test]
    fn test_canonical_alphabet_reservations() {
        assert_eq!(Can3::ord('a'), Some(1));
        assert_eq!(Can3::ord('c'), Some(3));
        assert_eq!(Can3::ord('d'), None);
        assert!(Can3::needs_escape('1'));
        assert!(Can3::needs_escape('.'));
        assert!(!Can3::needs_escape('_'));
    }

    // -----------------------------------------------------------------------
    // Tokenizer unit tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_tokenizer_stream() {
        let tokens: Vec<Token> = Tokenizer::<Ab>::new("a+b*(_)?").collect();
        assert_eq!(
            tokens,
            vec![
                Token::Letter(1),
                Token::Alternate,
                Token::Letter(2),
                Token::KleeneStar,
                Token::LBracket,
                Token::Empty,
                Token::RBracket,
                Token::QuestionMark,
            ]
        );
    }

    #[test]
    fn test_tokenizer_skips_spaces() {
        let tokens: Vec<Token> = Tokenizer::<Ab>::new("  a  b ").collect();
        assert_eq!(tokens, vec![Token::Letter(1), Token::Letter(2)]);
    }

    #[test]
    fn test_tokenizer_eol_repeats() {
        let mut cursor = Tokenizer::<Ab>::new("a");
        assert_eq!(cursor.current(), Token::Letter(1));
        cursor.advance();
        assert_eq!(cursor.current(), Token::Eol);
        cursor.advance();
        assert_eq!(cursor.current(), Token::Eol);
    }

    #[test]
    fn test_tokenizer_escaped_letter() {
        let mut cursor = Tokenizer::<Ab>::new("\\a");
        assert_eq!(cursor.current(), Token::Letter(1));
        cursor.advance();
        assert_eq!(cursor.current(), Token::Eol);
    }

    #[test]
    fn test_tokenizer_escaped_meta_outside_simple_alphabet() {
        // '+' is not a symbol of the simple alphabet, so escaping it
        // cannot produce a letter.
        let cursor = Tokenizer::<Ab>::new("\\+");
        assert_eq!(cursor.current(), Token::Error);

        // Over the byte alphabet the same escape is a literal.
        let cursor = Tokenizer::<CharAlphabet>::new("\\+");
        assert_eq!(cursor.current(), Token::Letter('+' as u64));
    }

    #[test]
    fn test_tokenizer_trailing_escape_is_stable() {
        let mut cursor = Tokenizer::<Ab>::new("\\");
        assert_eq!(cursor.current(), Token::Error);
        cursor.advance();
        assert_eq!(cursor.current(), Token::Error);
    }

    #[test]
    fn test_tokenizer_out_of_alphabet() {
        let cursor = Tokenizer::<Ab>::new("z");
        assert_eq!(cursor.current(), Token::Error);
    }

    #[test]
    fn test_tokenizer_canonical_dot() {
        let tokens: Vec<Token> = Tokenizer::<Can3>::new("ab+*c.").collect();
        assert_eq!(
            tokens,
            vec![
                Token::Letter(1),
                Token::Letter(2),
                Token::Alternate,
                Token::KleeneStar,
                Token::Letter(3),
                Token::Dot,
            ]
        );
    }

    #[test]
    fn test_tokenizer_clone_backtracks() {
        let mut cursor = Tokenizer::<Ab>::new("ab");
        let backup = cursor.clone();
        cursor.advance();
        assert_ne!(cursor, backup);
        assert_eq!(cursor.current(), Token::Letter(2));
        cursor = backup.clone();
        assert_eq!(cursor, backup);
        assert_eq!(cursor.current(), Token::Letter(1));
    }

    // -----------------------------------------------------------------------
    // Regex parsing and printing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_print_roundtrip_simple() {
        let src = "a+_((b?aaaa)?+a+_)*+((a+b)(a+b))?";
        assert_eq!(parse(src).to_string(), src);
    }

    #[test]
    fn test_parse_print_roundtrip_canonical() {
        let src = "a+1((b?aaaa)?+a+1)*+((a+b)(a+b))?";
        let regex: Regex<Can3> = src.parse().expect("pattern should parse");
        assert_eq!(regex.to_string(), src);
    }

    #[test]
    fn test_parse_print_roundtrip_char() {
        let src = "a+_((b?aosg3\\\\\\?)?+\\+\\*a+_)*+((a+b)(c+d))?";
        let regex: Regex<CharAlphabet> = src.parse().expect("pattern should parse");
        assert_eq!(regex.to_string(), src);
    }

    #[test]
    fn test_parse_failures() {
        for src in ["ab++", "a\\", "a+(", "(a+)", "()", "", "a)b", "a*?"] {
            assert_eq!(
                src.parse::<Regex<Ab>>(),
                Err(Error::Syntax),
                "{src:?} should not parse"
            );
        }
    }

    #[test]
    fn test_parse_skips_whitespace() {
        assert_eq!(parse("a + b ( a ) *").to_string(), "a+ba*");
        assert_eq!(parse(" a b "), parse("ab"));
    }

    #[test]
    fn test_parse_drops_redundant_brackets() {
        assert_eq!(parse("((a))").to_string(), "a");
        assert_eq!(parse("(a)(b)").to_string(), "ab");
    }

    #[test]
    fn test_print_brackets_by_precedence() {
        assert_eq!(parse("(a+b)?").to_string(), "(a+b)?");
        assert_eq!(parse("(a?)*").to_string(), "(a?)*");
        assert_eq!(parse("(ab)*").to_string(), "(ab)*");
        assert_eq!(parse("ab*").to_string(), "ab*");
    }

    #[test]
    fn test_handle_copy_on_write() {
        let original = parse("a+b");
        let mut copy = original.clone();
        assert!(copy.ptr_eq(&original));
        copy.optional();
        assert!(!copy.ptr_eq(&original));
        assert_ne!(copy, original);
        assert_eq!(original.to_string(), "a+b");
        assert_eq!(copy.to_string(), "(a+b)?");
    }

    #[test]
    fn test_handle_concat_empty_identity() {
        let mut regex = Regex::<Ab>::empty_string();
        regex.concat(parse("ab"));
        assert_eq!(regex.to_string(), "ab");
        regex.concat(Regex::empty_string());
        assert_eq!(regex.to_string(), "ab");
    }

    #[test]
    fn test_handle_concat_flattens() {
        let mut regex = parse("ab");
        regex.concat(parse("a"));
        assert_eq!(regex.to_string(), "aba");
    }

    #[test]
    fn test_handle_alternate_keeps_empty_branch() {
        let mut regex = parse("a");
        regex.alternate(Regex::empty_string());
        assert_eq!(regex.to_string(), "a+_");
    }

    #[test]
    fn test_handle_null_accumulator() {
        let mut acc = Regex::<Ab>::default();
        assert!(acc.is_null());
        acc.alternate(parse("a"));
        acc.alternate(parse("b"));
        acc.kleene();
        acc.concat(parse("ab"));
        assert_eq!(acc.to_string(), "(a+b)*ab");
    }

    #[test]
    fn test_handle_reverse() {
        let mut regex = parse("ab*c");
        regex.reverse();
        assert_eq!(regex.to_string(), "cb*a");

        let mut regex = parse("(ab+b)?");
        regex.reverse();
        assert_eq!(regex.to_string(), "(ba+b)?");
    }

    #[test]
    fn test_handle_chained_combinators() {
        let mut regex = parse("ab");
        regex.kleene().optional().reverse();
        // The star binds below the question mark, so no brackets appear.
        assert_eq!(regex.to_string(), "(ba)*?");
    }

    #[test]
    fn test_postfix_parse() {
        let regex = Regex::<Can3>::from_postfix("ab+*c.").expect("postfix should parse");
        assert_eq!(regex.to_string(), "(a+b)*c");

        let regex = Regex::<Can3>::from_postfix("a1+").expect("postfix should parse");
        assert_eq!(regex.to_string(), "a+1");

        // Concatenation with the empty word collapses.
        let regex = Regex::<Can3>::from_postfix("a1.").expect("postfix should parse");
        assert_eq!(regex.to_string(), "a");
    }

    #[test]
    fn test_postfix_parse_failures() {
        for src in ["ab", "+", "a+", "a*+", "", "a(", "az"] {
            assert_eq!(
                Regex::<Can3>::from_postfix(src),
                Err(Error::Syntax),
                "{src:?} should not parse as postfix"
            );
        }
    }

    // -----------------------------------------------------------------------
    // NFA unit tests
    // -----------------------------------------------------------------------

    /// The Thompson automaton of a single `a`.
    fn letter_nfa() -> Nfa<Ab> {
        let mut nfa = Nfa::new();
        let accept = nfa.create_node();
        nfa.make_finite(accept);
        nfa.add_transition(nfa.start(), 1, accept);
        nfa
    }

    #[test]
    fn test_nfa_set_and_remove() {
        let mut nfa = Nfa::<Ab>::new();
        let node = nfa.create_node();

        nfa.add_transition(nfa.start(), 1, node);
        assert!(nfa.has_transition(nfa.start(), 1, node));
        nfa.remove_transition(nfa.start(), 1, node);
        assert!(!nfa.has_transition(nfa.start(), 1, node));

        assert!(!nfa.is_finite(node));
        nfa.make_finite(node);
        assert!(nfa.is_finite(node));
        nfa.remove_finite(node);
        assert!(!nfa.is_finite(node));

        assert_eq!(nfa.transitions(nfa.start()).get(&1).map(Vec::len), Some(0));

        nfa.remove_epsilon_transitions();
        assert_eq!(nfa.text_dump(), "0\n\n\n\n");
    }

    #[test]
    fn test_nfa_duplicate_edges_collapse() {
        let mut nfa = Nfa::<Ab>::new();
        let node = nfa.create_node();
        nfa.add_transition(nfa.start(), 1, node);
        nfa.add_transition(nfa.start(), 1, node);
        assert_eq!(nfa.transitions(nfa.start()).get(&1).map(Vec::len), Some(1));
    }

    #[test]
    fn test_nfa_start_is_zero() {
        let mut nfa = Nfa::<Ab>::new();
        let node = nfa.create_node();
        assert_eq!(nfa.start().to_string(), "0");
        assert_ne!(node, nfa.start());
    }

    #[test]
    fn test_nfa_text_dump() {
        let nfa = letter_nfa();
        assert_eq!(nfa.text_dump(), "0\n\n1\n\n0 1 a\n\n");
    }

    #[test]
    fn test_nfa_text_dump_escapes() {
        let mut nfa = Nfa::<CharAlphabet>::new();
        let node = nfa.create_node();
        nfa.make_finite(node);
        nfa.add_transition(nfa.start(), '+' as u64, node);
        assert_eq!(nfa.text_dump(), "0\n\n1\n\n0 1 \\+\n\n");
    }

    #[test]
    fn test_nfa_kleene() {
        let mut nfa = letter_nfa();
        nfa.kleene();
        assert_eq!(nfa.text_dump(), "2\n\n1\n2\n\n0 1 a\n1 2 2 0 \n");
    }

    #[test]
    fn test_nfa_optional() {
        let mut nfa = letter_nfa();
        nfa.optional();
        assert_eq!(nfa.text_dump(), "2\n\n1\n2\n\n0 1 a\n2 0 \n");
    }

    #[test]
    fn test_nfa_concat() {
        let mut nfa = letter_nfa();
        nfa.concat(letter_nfa());
        assert_eq!(nfa.text_dump(), "0\n\n3\n\n0 1 a\n1 2 2 3 a\n\n");
    }

    #[test]
    fn test_nfa_alternate() {
        let mut nfa = letter_nfa();
        nfa.alternate(letter_nfa());
        assert_eq!(nfa.text_dump(), "4\n\n5\n\n0 1 a\n1 5 2 3 a\n3 5 4 0 4 2 \n");
    }

    #[test]
    fn test_epsilon_elimination_leaves_no_epsilon() {
        let regex = parse("a+_((b?aa)?+a+_)*");
        let mut nfa = nfa_from_regex(&regex);
        nfa.remove_epsilon_transitions();
        for idx in 0..nfa.size() {
            assert!(
                !nfa.transitions(StateId::new(idx)).contains_key(&EPSILON),
                "state {idx} kept an epsilon transition"
            );
        }
    }

    #[test]
    fn test_epsilon_elimination_preserves_language() {
        let regex = parse("(a+_)(ba)*");
        let mut nfa = nfa_from_regex(&regex);
        nfa.remove_epsilon_transitions();
        let dfa = dfa_from_nfa(&nfa);
        for (word, expected) in [
            ("", true),
            ("a", true),
            ("ba", true),
            ("aba", true),
            ("abab", false),
            ("ababa", true),
            ("b", false),
            ("bb", false),
        ] {
            assert_eq!(dfa.accepts(word.chars()), expected, "word {word:?}");
        }
    }

    #[test]
    fn test_prune_dead_states() {
        // 0 -a-> 1 (accepting), 0 -b-> 2 -a-> 2: the 2 branch never
        // reaches an accepting state.
        let mut nfa = Nfa::<Ab>::new();
        let one = nfa.create_node();
        let two = nfa.create_node();
        nfa.make_finite(one);
        nfa.add_transition(nfa.start(), 1, one);
        nfa.add_transition(nfa.start(), 2, two);
        nfa.add_transition(two, 1, two);
        nfa.prune_dead_states();
        assert!(nfa.has_transition(nfa.start(), 1, one));
        assert!(!nfa.has_transition(nfa.start(), 2, two));
        assert!(!nfa.has_transition(two, 1, two));
    }

    // -----------------------------------------------------------------------
    // DFA unit tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_dfa_set_and_remove() {
        let mut dfa = Dfa::<Ab>::new();
        let node = dfa.create_node();

        dfa.set_transition(dfa.start(), 0, node);
        assert!(dfa.has_transition(dfa.start(), 0, node));
        dfa.remove_transition(dfa.start(), 0);
        assert!(!dfa.has_transition(dfa.start(), 0, node));

        assert!(!dfa.is_finite(node));
        dfa.make_finite(node);
        assert!(dfa.is_finite(node));
        dfa.remove_finite(node);
        assert!(!dfa.is_finite(node));

        let dead = [StateId::ERROR, StateId::ERROR, StateId::ERROR];
        assert_eq!(dfa.transitions(dfa.start()), &dead[..]);
        assert_eq!(dfa.transitions(node), &dead[..]);
    }

    #[test]
    fn test_dfa_start_is_zero() {
        let mut dfa = Dfa::<Ab>::new();
        dfa.create_node();
        assert_eq!(dfa.start().to_string(), "0");
    }

    #[test]
    fn test_dfa_text_dump() {
        let mut dfa = Dfa::<Ab>::new();
        let node = dfa.create_node();
        dfa.make_finite(node);
        dfa.set_transition(dfa.start(), 1, node);
        assert_eq!(dfa.text_dump(), "0\n\n1\n\n0 1 a\n\n");
    }

    #[test]
    fn test_dfa_inverse_involution() {
        let mut dfa = Dfa::<Ab>::new();
        let node = dfa.create_node();
        dfa.make_finite(node);
        dfa.set_transition(dfa.start(), 1, node);

        let mut twice = dfa.clone();
        twice.inverse();
        assert_ne!(dfa.text_dump(), twice.text_dump());
        twice.inverse();
        assert_eq!(dfa.text_dump(), twice.text_dump());
    }

    // -----------------------------------------------------------------------
    // Subset construction and minimization
    // -----------------------------------------------------------------------

    #[test]
    fn test_subset_construction_is_total() {
        let regex = parse("(ab+ba)*(_+a+ba)");
        let mut nfa = nfa_from_regex(&regex);
        nfa.remove_epsilon_transitions();
        let dfa = dfa_from_nfa(&nfa);
        for idx in 0..dfa.size() {
            let row = dfa.transitions(StateId::new(idx));
            for via in 1..Ab::SIZE {
                assert_ne!(
                    row[via as usize],
                    StateId::ERROR,
                    "state {idx} lacks a transition on ordinal {via}"
                );
            }
        }
    }

    #[test]
    fn test_subset_construction_language() {
        let regex = parse("a(a+b)*b");
        let mut nfa = nfa_from_regex(&regex);
        nfa.remove_epsilon_transitions();
        let dfa = dfa_from_nfa(&nfa);
        for word in words(6) {
            let expected = word.starts_with('a') && word.ends_with('b');
            assert_eq!(dfa.accepts(word.chars()), expected, "word {word:?}");
        }
    }

    #[test]
    fn test_minimize_shrinks_and_preserves_language() {
        let regex = parse("(ab+ba)*(_+a+ba)");
        let mut nfa = nfa_from_regex(&regex);
        nfa.remove_epsilon_transitions();
        let dfa = dfa_from_nfa(&nfa);
        let min = minimize(&dfa);
        assert!(min.size() <= dfa.size());
        for word in words(7) {
            assert_eq!(
                min.accepts(word.chars()),
                dfa.accepts(word.chars()),
                "word {word:?}"
            );
        }
    }

    #[test]
    fn test_minimize_idempotent() {
        let regex = parse("(ab+ba)*(_+a+ba)");
        let min = mdfa_from_regex(&regex);
        let again = minimize(&min);
        assert_eq!(min.size(), again.size());
        for word in words(7) {
            assert_eq!(
                min.accepts(word.chars()),
                again.accepts(word.chars()),
                "word {word:?}"
            );
        }
    }

    #[test]
    fn test_minimize_all_accepting_input() {
        let min = mdfa_from_regex(&parse("(a+b)*"));
        for word in words(5) {
            assert!(min.accepts(word.chars()), "word {word:?}");
        }
        // Idempotence holds even though the rejecting seed class ends
        // up with an all-dead row.
        let again = minimize(&min);
        assert_eq!(min.size(), again.size());
        for word in words(5) {
            assert!(again.accepts(word.chars()), "word {word:?}");
        }
    }

    #[test]
    fn test_minimize_partial_dfa() {
        // A hand-built automaton for "a" that leans on the explicit
        // dead entry instead of a dead state.
        let mut dfa = Dfa::<Ab>::new();
        let accept = dfa.create_node();
        dfa.make_finite(accept);
        dfa.set_transition(dfa.start(), 1, accept);
        let min = minimize(&dfa);
        assert!(min.accepts("a".chars()));
        assert!(!min.accepts("".chars()));
        assert!(!min.accepts("aa".chars()));
        assert!(!min.accepts("b".chars()));
    }

    // -----------------------------------------------------------------------
    // State elimination
    // -----------------------------------------------------------------------

    #[test]
    fn test_inverted_pipeline_reconstruction() {
        let regex = parse("(ab+ba)*(_+a+ba)");
        let mut nfa = nfa_from_regex(&regex);
        nfa.remove_epsilon_transitions();
        let mut dfa = dfa_from_nfa(&nfa);
        dfa.inverse();
        let min = minimize(&dfa);
        let back = regex_from_dfa(&min).expect("complement is not empty");
        assert_eq!(back.to_string(), "(ba+ab)*((aa+bb)(a+b)*+b)");
    }

    #[test]
    fn test_regex_from_dfa_language_roundtrip() {
        for pattern in [
            "(ab+ba)*(_+a+ba)",
            "a(a+b)*b",
            "((a+b)(a+b))*",
            "a?b*a",
            "_+a+b?",
            "(a+b)*",
        ] {
            let regex = parse(pattern);
            let min = mdfa_from_regex(&regex);
            let back = regex_from_dfa(&min).expect("language is not empty");
            let back_min = mdfa_from_regex(&back);
            for word in words(7) {
                assert_eq!(
                    min.accepts(word.chars()),
                    back_min.accepts(word.chars()),
                    "pattern {pattern:?}, word {word:?}"
                );
            }
            // The printed form re-parses to the same language as well.
            let reparsed: Regex<Ab> =
                back.to_string().parse().expect("printed regex should parse");
            let reparsed_min = mdfa_from_regex(&reparsed);
            for word in words(7) {
                assert_eq!(
                    min.accepts(word.chars()),
                    reparsed_min.accepts(word.chars()),
                    "pattern {pattern:?}, word {word:?}"
                );
            }
        }
    }

    #[test]
    fn test_regex_from_dfa_empty_language() {
        assert_eq!(
            regex_from_dfa(&Dfa::<Ab>::new()).unwrap_err(),
            Error::EmptyLanguage
        );

        // The complement of "everything" is empty as well.
        let mut universal = mdfa_from_regex(&parse("(a+b)*"));
        universal.inverse();
        assert_eq!(
            regex_from_dfa(&universal).unwrap_err(),
            Error::EmptyLanguage
        );
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let run = || {
            let regex = parse("(ab+ba)*(_+a+ba)");
            let mut nfa = nfa_from_regex(&regex);
            nfa.remove_epsilon_transitions();
            let mut dfa = dfa_from_nfa(&nfa);
            dfa.inverse();
            let min = minimize(&dfa);
            let back = regex_from_dfa(&min).expect("complement is not empty");
            (nfa.text_dump(), min.text_dump(), back.to_string())
        };
        assert_eq!(run(), run());
    }

    // -----------------------------------------------------------------------
    // Matcher
    // -----------------------------------------------------------------------

    #[test]
    fn test_longest_match_canonical_postfix() {
        assert_eq!(
            max_match::<Can3>("ab+*c.", "ababaccaba"),
            Ok(6),
            "(a+b)*c should match the prefix ababac"
        );
    }

    #[test]
    fn test_longest_match_infix() {
        assert_eq!(max_match::<Ab>("(ab+ba)*", "abbaab"), Ok(6));
        assert_eq!(max_match::<Ab>("(ab+ba)*", "abab"), Ok(4));
        assert_eq!(max_match::<Ab>("(ab+ba)*", "aab"), Ok(0));
        assert_eq!(max_match::<Ab>("a?b*a", "bba"), Ok(3));
    }

    #[test]
    fn test_longest_match_stops_outside_alphabet() {
        assert_eq!(max_match::<Ab>("a*", "aaz aa"), Ok(2));
    }

    #[test]
    fn test_max_match_rejects_garbage() {
        assert_eq!(max_match::<Ab>("a+(", "a"), Err(Error::Syntax));
    }

    #[test]
    fn test_longest_match_on_dfa() {
        let dfa = mdfa_from_regex(&parse("ab"));
        assert_eq!(dfa.longest_match("abab".chars()), 2);
        assert_eq!(dfa.longest_match("ba".chars()), 0);
        assert_eq!(dfa.longest_match("".chars()), 0);
    }
}
