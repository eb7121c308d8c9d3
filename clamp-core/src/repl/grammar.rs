#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the operator console.
//!
//! The lexer uses `regal` to produce a bounded token stream, and the parser
//! composes `winnow` combinators over those tokens to build [`Command`]
//! values. Keywords match case-insensitively.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use crate::config::ParameterKey;
use crate::protocol::{StepDescriptor, StepField, StepKind};

/// Maximum number of tokens produced per console line.
pub const MAX_TOKENS: usize = 48;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Most assignments a single `set` line can carry (one per parameter).
pub const MAX_ASSIGNMENTS: usize = ParameterKey::ALL.len();

/// Token classes of a console line.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Signed decimal, fraction optional.
    #[regex(r"-?[0-9]+(?:\.[0-9]+)?")]
    Number,
    /// Keyword, parameter key or help topic.
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    #[token("=")]
    Equals,
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// Line terminator of any common flavour.
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Anything the rules above do not cover.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// A lexeme together with its byte range in the console line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Fixed-capacity token storage for one line.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// The line needs more than [`MAX_TOKENS`] tokens.
    TooManyTokens { processed: usize },
    /// `regal` gave up on the line.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "line too long ({processed} tokens, limit {MAX_TOKENS})")
            }
            LexError::Engine => f.write_str("line could not be tokenized"),
        }
    }
}

/// What the parser objected to, with the offending lexeme where there is one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        lexeme: &'a str,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidNumber {
        lexeme: &'a str,
        span: Range<usize>,
    },
    DuplicateKey {
        lexeme: &'a str,
        span: Range<usize>,
    },
    InvalidToken {
        lexeme: &'a str,
        span: Range<usize>,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                lexeme,
                span,
            } => write!(f, "expected {expected}, found `{lexeme}` at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "line ended early, expected {expected}")
            }
            GrammarErrorKind::InvalidNumber { lexeme, span } => {
                write!(f, "`{lexeme}` is not a valid value at {span:?}")
            }
            GrammarErrorKind::DuplicateKey { lexeme, span } => {
                write!(f, "`{lexeme}` given twice at {span:?}")
            }
            GrammarErrorKind::InvalidToken { lexeme, span } => {
                write!(f, "stray `{lexeme}` at {span:?}")
            }
        }
    }
}

/// Parser error carried through the `winnow` combinators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl<'a> From<GrammarErrorKind<'a>> for GrammarError<'a> {
    fn from(kind: GrammarErrorKind<'a>) -> Self {
        GrammarError { kind }
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, found: Option<&Token<'a>>) -> Self {
        match found {
            Some(token) if token.kind != TokenKind::Eol => GrammarErrorKind::UnexpectedToken {
                expected,
                lexeme: token.lexeme,
                span: token.span.clone(),
            },
            _ => GrammarErrorKind::UnexpectedEnd { expected },
        }
        .into()
    }

    fn invalid_number(token: &Token<'a>) -> Self {
        GrammarErrorKind::InvalidNumber {
            lexeme: token.lexeme,
            span: token.span.clone(),
        }
        .into()
    }

    fn duplicate(token: &Token<'a>) -> Self {
        GrammarErrorKind::DuplicateKey {
            lexeme: token.lexeme,
            span: token.span.clone(),
        }
        .into()
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarErrorKind::InvalidToken {
            lexeme: token.lexeme,
            span: token.span.clone(),
        }
        .into()
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];
type Step<'src, T> = Result<T, ErrMode<GrammarError<'src>>>;

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Failure from either [`lex`] or the grammar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(error) => fmt::Display::fmt(error, f),
            ParseError::Grammar(error) => fmt::Display::fmt(error, f),
        }
    }
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq)]
pub enum Command<'a> {
    Threshold(Toggle),
    Pace(Toggle),
    Protocol(ProtocolCommand),
    Set(Assignments),
    /// Sampling period in milliseconds.
    Period(f64),
    Record(Toggle),
    Reset,
    Status,
    Help(HelpCommand<'a>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggle {
    Start,
    Stop,
}

/// Protocol editing and run control.
#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolCommand {
    Start,
    Stop,
    List,
    Clear,
    Add(StepDescriptor),
    /// Inserts after the one-based step `after`; `0` inserts at the front.
    Insert { after: usize, step: StepDescriptor },
    /// One-based step number.
    Delete(usize),
}

/// Parameter assignments from a `set` line, in the order given.
pub type Assignments = HeaplessVec<(ParameterKey, f64), MAX_ASSIGNMENTS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommandTag {
    Threshold,
    Pace,
    Protocol,
    Set,
    Period,
    Record,
    Reset,
    Status,
    Help,
}

const COMMANDS: &[(&str, CommandTag)] = &[
    ("threshold", CommandTag::Threshold),
    ("pace", CommandTag::Pace),
    ("protocol", CommandTag::Protocol),
    ("set", CommandTag::Set),
    ("period", CommandTag::Period),
    ("record", CommandTag::Record),
    ("reset", CommandTag::Reset),
    ("status", CommandTag::Status),
    ("help", CommandTag::Help),
];

/// Command keywords, in help order.
pub fn command_keywords() -> impl Iterator<Item = &'static str> {
    COMMANDS.iter().map(|(keyword, _)| *keyword)
}

/// Parses one command off the front of `tokens`, returning what is left.
pub(crate) fn parse_tokens_partial<'src, 'slice>(
    tokens: &'slice [Token<'src>],
) -> Result<(Command<'src>, &'slice [Token<'src>]), GrammarError<'src>>
where
    'src: 'slice,
{
    let mut rest = tokens;
    command()
        .parse_next(&mut rest)
        .map(|parsed| (parsed, rest))
        .map_err(|error| match error {
            ErrMode::Backtrack(error) | ErrMode::Cut(error) => error,
            ErrMode::Incomplete(_) => GrammarError::unexpected("token", rest.first()),
        })
}

/// Splits `line` into tokens, dropping whitespace.
///
/// Trailing input the lexer could not classify comes back as a single
/// [`TokenKind::Error`] token.
///
/// # Errors
///
/// Fails when the line produces more than [`MAX_TOKENS`] tokens.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let leftover = cache
        .rebuild(TokenKind::lexer(), line)
        .map_err(|error| match error {
            IncrementalError::TokenOverflow => LexError::TooManyTokens {
                processed: MAX_TOKENS,
            },
            _ => LexError::Engine,
        })?;

    let mut tokens = TokenBuffer::new();
    for record in cache.tokens() {
        if !record.skipped {
            let span = record.start..record.end;
            push_token(
                &mut tokens,
                Token {
                    kind: record.token,
                    lexeme: &line[span.clone()],
                    span,
                },
            )?;
        }
    }

    if let Some(tail) = leftover.filter(|tail| !tail.fragment.is_empty()) {
        let span = tail.start..tail.start + tail.fragment.len();
        push_token(
            &mut tokens,
            Token {
                kind: TokenKind::Error,
                lexeme: tail.fragment,
                span,
            },
        )?;
    }

    Ok(tokens)
}

fn push_token<'a>(tokens: &mut TokenBuffer<'a>, token: Token<'a>) -> Result<(), LexError> {
    let processed = tokens.len() + 1;
    tokens
        .push(token)
        .map_err(|_| LexError::TooManyTokens { processed })
}

/// Parses one console line into a [`Command`].
///
/// # Errors
///
/// Returns the lexer failure or the first grammar violation.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;
    if let Some(stray) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(stray)));
    }

    let (parsed, rest) = parse_tokens_partial(&tokens).map_err(ParseError::Grammar)?;
    match rest.iter().find(|token| token.kind != TokenKind::Eol) {
        Some(extra) => Err(ParseError::Grammar(GrammarError::unexpected(
            "end of command",
            Some(extra),
        ))),
        None => Ok(parsed),
    }
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let snapshot = *input;
        let keyword = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;

        let Some(tag) = COMMANDS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(keyword.lexeme))
            .map(|(_, tag)| *tag)
        else {
            *input = snapshot;
            return Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command keyword",
                Some(&keyword),
            )));
        };

        match tag {
            CommandTag::Threshold => toggle(input).map(Command::Threshold),
            CommandTag::Pace => toggle(input).map(Command::Pace),
            CommandTag::Record => toggle(input).map(Command::Record),
            CommandTag::Protocol => protocol(input).map(Command::Protocol),
            CommandTag::Set => assignments(input).map(Command::Set),
            CommandTag::Period => number(input, "period in ms").map(Command::Period),
            CommandTag::Reset => Ok(Command::Reset),
            CommandTag::Status => Ok(Command::Status),
            CommandTag::Help => Ok(Command::Help(HelpCommand {
                topic: optional_ident(input),
            })),
        }
    }
}

fn toggle<'src>(input: &mut Input<'src, '_>) -> Step<'src, Toggle> {
    let token = expect_kind(TokenKind::Ident, "start or stop").parse_next(input)?;
    if token.lexeme.eq_ignore_ascii_case("start") {
        Ok(Toggle::Start)
    } else if token.lexeme.eq_ignore_ascii_case("stop") {
        Ok(Toggle::Stop)
    } else {
        Err(ErrMode::Cut(GrammarError::unexpected(
            "start or stop",
            Some(&token),
        )))
    }
}

fn protocol<'src>(input: &mut Input<'src, '_>) -> Step<'src, ProtocolCommand> {
    const EXPECTED: &str = "start, stop, list, clear, add, insert or delete";
    let token = expect_kind(TokenKind::Ident, EXPECTED).parse_next(input)?;
    let word = token.lexeme;

    if word.eq_ignore_ascii_case("start") {
        Ok(ProtocolCommand::Start)
    } else if word.eq_ignore_ascii_case("stop") {
        Ok(ProtocolCommand::Stop)
    } else if word.eq_ignore_ascii_case("list") {
        Ok(ProtocolCommand::List)
    } else if word.eq_ignore_ascii_case("clear") {
        Ok(ProtocolCommand::Clear)
    } else if word.eq_ignore_ascii_case("add") {
        step_descriptor(input).map(ProtocolCommand::Add)
    } else if word.eq_ignore_ascii_case("insert") {
        let after = integer::<usize>(input, "step number")?;
        let step = step_descriptor(input)?;
        Ok(ProtocolCommand::Insert { after, step })
    } else if word.eq_ignore_ascii_case("delete") {
        let (position, token) = integer_token::<usize>(input, "step number")?;
        if position == 0 {
            return Err(ErrMode::Cut(GrammarError::invalid_number(&token)));
        }
        Ok(ProtocolCommand::Delete(position))
    } else {
        Err(ErrMode::Cut(GrammarError::unexpected(EXPECTED, Some(&token))))
    }
}

fn step_descriptor<'src>(input: &mut Input<'src, '_>) -> Step<'src, StepDescriptor> {
    let kind_token = expect_kind(TokenKind::Ident, "step kind").parse_next(input)?;
    let kind = StepKind::from_keyword(kind_token.lexeme).ok_or_else(|| {
        ErrMode::Cut(GrammarError::unexpected("step kind", Some(&kind_token)))
    })?;
    let mut descriptor = StepDescriptor::new(kind);

    while let Some(key_token) = peek_kind(input, TokenKind::Ident) {
        let field = StepField::from_key(key_token.lexeme).ok_or_else(|| {
            ErrMode::Cut(GrammarError::unexpected("bcl, beats, index, wait or dout", Some(&key_token)))
        })?;
        if descriptor.has(field) {
            return Err(ErrMode::Cut(GrammarError::duplicate(&key_token)));
        }
        *input = &input[1..];
        expect_kind(TokenKind::Equals, "=").parse_next(input)?;

        match field {
            StepField::CycleLength => {
                descriptor.cycle_length_ms = Some(number(input, "cycle length")?);
            }
            StepField::Beats => descriptor.beats = Some(integer(input, "beat count")?),
            StepField::BufferIndex => {
                descriptor.buffer_index = Some(integer(input, "buffer index")?);
            }
            StepField::Wait => descriptor.wait_ms = Some(number(input, "wait time")?),
            StepField::DigitalOut => {
                descriptor.digital_out = Some(integer(input, "digital level")?);
            }
        }
    }

    Ok(descriptor)
}

fn assignments<'src>(input: &mut Input<'src, '_>) -> Step<'src, Assignments> {
    let mut values = Assignments::new();
    loop {
        let key_token = expect_kind(TokenKind::Ident, "parameter name").parse_next(input)?;
        let key = ParameterKey::from_name(key_token.lexeme).ok_or_else(|| {
            ErrMode::Cut(GrammarError::unexpected("parameter name", Some(&key_token)))
        })?;
        if values.iter().any(|(seen, _)| *seen == key) {
            return Err(ErrMode::Cut(GrammarError::duplicate(&key_token)));
        }
        expect_kind(TokenKind::Equals, "=").parse_next(input)?;
        let value = number(input, "value")?;
        values
            .push((key, value))
            .map_err(|_| ErrMode::Cut(GrammarError::duplicate(&key_token)))?;

        if peek_kind(input, TokenKind::Ident).is_none() {
            return Ok(values);
        }
    }
}

fn optional_ident<'src>(input: &mut Input<'src, '_>) -> Option<&'src str> {
    let token = peek_kind(input, TokenKind::Ident)?;
    *input = &input[1..];
    Some(token.lexeme)
}

fn peek_kind<'src>(input: &Input<'src, '_>, kind: TokenKind) -> Option<Token<'src>> {
    input.first().filter(|token| token.kind == kind).cloned()
}

fn number<'src>(input: &mut Input<'src, '_>, label: &'static str) -> Step<'src, f64> {
    let token = expect_kind(TokenKind::Number, label).parse_next(input)?;
    token
        .lexeme
        .parse::<f64>()
        .map_err(|_| ErrMode::Cut(GrammarError::invalid_number(&token)))
}

fn integer<'src, T>(input: &mut Input<'src, '_>, label: &'static str) -> Step<'src, T>
where
    T: core::str::FromStr,
{
    integer_token(input, label).map(|(value, _)| value)
}

fn integer_token<'src, T>(
    input: &mut Input<'src, '_>,
    label: &'static str,
) -> Step<'src, (T, Token<'src>)>
where
    T: core::str::FromStr,
{
    let token = expect_kind(TokenKind::Number, label).parse_next(input)?;
    match token.lexeme.parse::<T>() {
        Ok(value) => Ok((value, token)),
        Err(_) => Err(ErrMode::Cut(GrammarError::invalid_number(&token))),
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    #[test]
    fn parses_mode_toggles() {
        assert_eq!(parse_ok("threshold start"), Command::Threshold(Toggle::Start));
        assert_eq!(parse_ok("PACE Stop"), Command::Pace(Toggle::Stop));
        assert_eq!(parse_ok("record start\r\n"), Command::Record(Toggle::Start));
    }

    #[test]
    fn parses_protocol_add_with_fields() {
        match parse_ok("protocol add average index=4 bcl=500 beats=10 dout=1") {
            Command::Protocol(ProtocolCommand::Add(descriptor)) => {
                assert_eq!(descriptor.step_type, StepKind::AverageVm.code());
                assert_eq!(descriptor.buffer_index, Some(4));
                assert_eq!(descriptor.beats, Some(10));
                assert_eq!(descriptor.digital_out, Some(1));
                assert_eq!(descriptor.cycle_length_ms, Some(500.0));
                assert_eq!(descriptor.wait_ms, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_protocol_insert_and_delete() {
        match parse_ok("protocol insert 0 wait wait=12.5") {
            Command::Protocol(ProtocolCommand::Insert { after: 0, step }) => {
                assert_eq!(step.wait_ms, Some(12.5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(
            parse_ok("protocol delete 3"),
            Command::Protocol(ProtocolCommand::Delete(3))
        );
    }

    #[test]
    fn rejects_step_zero_and_fractional_beats() {
        match parse("protocol delete 0") {
            Err(ParseError::Grammar(err)) => {
                assert!(matches!(err.kind, GrammarErrorKind::InvalidNumber { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        match parse("protocol add pace bcl=1000 beats=2.5") {
            Err(ParseError::Grammar(err)) => {
                assert!(matches!(err.kind, GrammarErrorKind::InvalidNumber { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_and_unknown_step_fields() {
        match parse("protocol add pace bcl=1 bcl=2 beats=1") {
            Err(ParseError::Grammar(err)) => {
                assert!(matches!(
                    err.kind,
                    GrammarErrorKind::DuplicateKey { lexeme: "bcl", .. }
                ));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        match parse("protocol add pace rate=3") {
            Err(ParseError::Grammar(err)) => {
                assert!(matches!(
                    err.kind,
                    GrammarErrorKind::UnexpectedToken { lexeme: "rate", .. }
                ));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parses_parameter_assignments_in_order() {
        match parse_ok("set bcl=500 ljp=-12.5 trials=3") {
            Command::Set(values) => {
                assert_eq!(
                    values.as_slice(),
                    &[
                        (ParameterKey::CycleLength, 500.0),
                        (ParameterKey::Ljp, -12.5),
                        (ParameterKey::Trials, 3.0),
                    ]
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(parse("set").is_err());
        assert!(parse("set voltage=3").is_err());
    }

    #[test]
    fn parses_period_reset_status_and_help() {
        assert_eq!(parse_ok("period 0.25"), Command::Period(0.25));
        assert_eq!(parse_ok("reset"), Command::Reset);
        assert_eq!(parse_ok("status"), Command::Status);
        assert_eq!(
            parse_ok("help protocol"),
            Command::Help(HelpCommand {
                topic: Some("protocol"),
            })
        );
        assert_eq!(parse_ok("help"), Command::Help(HelpCommand { topic: None }));
    }

    #[test]
    fn rejects_trailing_tokens() {
        match parse("status now") {
            Err(ParseError::Grammar(err)) => {
                assert!(matches!(err.kind, GrammarErrorKind::UnexpectedToken { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_token() {
        match parse("pace start$") {
            Err(ParseError::Grammar(err)) => {
                assert!(matches!(err.kind, GrammarErrorKind::InvalidToken { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn lexer_splits_signed_numbers_from_keys() {
        let tokens = lex("ljp=-3.5").expect("lexing should succeed");
        let kinds: HeaplessVec<TokenKind, 4> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds.as_slice(),
            &[TokenKind::Ident, TokenKind::Equals, TokenKind::Number]
        );
        assert_eq!(tokens[2].lexeme, "-3.5");
    }
}
