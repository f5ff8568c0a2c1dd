//! Built-in markup producer
//!
//! A statement-level grammar for the four supported languages: comments,
//! preprocessor lines, string/char/number literals, identifier expression
//! statements, empty statements and registered macro calls. Anything it does
//! not recognize passes through as plain text, so the producer is
//! byte-faithful for arbitrary input. Richer grammars implement the same
//! `TokenProducer` trait.

use std::collections::{HashSet, VecDeque};

use crate::core::error::Result;
use crate::core::language::Language;
use crate::markup::token::{ElementKind, MarkupToken, TokenProducer};

/// Grammar configuration snapshot taken from the archive at parse time
#[derive(Debug, Clone, Default)]
pub struct GrammarConfig {
    /// Mark string/char/number/boolean literals with `<literal>` elements
    pub literal_markup: bool,
    /// Registered macro tokens; a bare `MACRO ;` statement is marked as a call
    pub macros: HashSet<String>,
}

/// Statement-keyword identifiers never marked as expression names
const STMT_KEYWORDS: &[&str] = &[
    "return", "break", "continue", "goto", "case", "default", "else", "do",
];

pub struct SourceTokenizer<'a> {
    bytes: &'a [u8],
    pos: usize,
    language: Language,
    config: GrammarConfig,
    queue: VecDeque<MarkupToken>,
    started: bool,
    finished: bool,
    /// True at the start of input and after `;`, `{`, `}` or a newline
    at_stmt_start: bool,
    /// True when only whitespace has been seen since the last newline
    at_line_start: bool,
}

impl<'a> SourceTokenizer<'a> {
    pub fn new(bytes: &'a [u8], language: Language, config: GrammarConfig) -> Self {
        Self {
            bytes,
            pos: 0,
            language,
            config,
            queue: VecDeque::new(),
            started: false,
            finished: false,
            at_stmt_start: true,
            at_line_start: true,
        }
    }

    /// Emit `bytes` as text, splitting out control bytes XML cannot carry
    fn push_text(&mut self, bytes: &[u8]) {
        let mut run = Vec::new();
        for &b in bytes {
            if is_escape_byte(b) {
                if !run.is_empty() {
                    self.queue.push_back(MarkupToken::Text(std::mem::take(&mut run)));
                }
                self.queue.push_back(MarkupToken::Escape(b));
            } else {
                run.push(b);
            }
        }
        if !run.is_empty() {
            self.queue.push_back(MarkupToken::Text(run));
        }
    }

    fn fill_queue(&mut self) {
        if self.pos >= self.bytes.len() {
            if !self.finished {
                self.finished = true;
                self.queue.push_back(MarkupToken::EndElement(ElementKind::Unit));
                self.queue.push_back(MarkupToken::EndOfInput);
            }
            return;
        }

        let b = self.bytes[self.pos];

        if is_escape_byte(b) {
            self.queue.push_back(MarkupToken::Escape(b));
            self.pos += 1;
            return;
        }

        if b == b'/' && self.peek(1) == Some(b'*') {
            self.scan_block_comment();
            return;
        }
        if b == b'/' && self.peek(1) == Some(b'/') {
            self.scan_line_comment();
            return;
        }
        if b == b'#' && self.at_line_start && self.language.has_preprocessor() {
            self.scan_directive();
            return;
        }
        if b == b'"' {
            self.scan_string(b'"', ElementKind::LiteralString);
            return;
        }
        if b == b'\'' {
            self.scan_string(b'\'', ElementKind::LiteralChar);
            return;
        }
        if b.is_ascii_digit() {
            self.scan_number();
            return;
        }
        if is_ident_start(b) {
            self.scan_identifier();
            return;
        }

        // single punctuation or whitespace byte
        self.pos += 1;
        match b {
            b';' if self.at_stmt_start => {
                self.queue.push_back(MarkupToken::StartElement(ElementKind::EmptyStmt));
                self.queue.push_back(MarkupToken::Text(vec![b';']));
                self.queue.push_back(MarkupToken::EndElement(ElementKind::EmptyStmt));
            }
            b';' | b'{' | b'}' => {
                self.queue.push_back(MarkupToken::Text(vec![b]));
                self.at_stmt_start = true;
            }
            b'\n' => {
                self.queue.push_back(MarkupToken::Text(vec![b]));
                self.at_stmt_start = true;
                self.at_line_start = true;
                return;
            }
            b' ' | b'\t' | b'\r' => {
                self.queue.push_back(MarkupToken::Text(vec![b]));
                return; // whitespace leaves both states untouched
            }
            other => {
                self.queue.push_back(MarkupToken::Text(vec![other]));
                self.at_stmt_start = false;
            }
        }
        self.at_line_start = false;
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn scan_block_comment(&mut self) {
        let start = self.pos;
        let mut end = self.pos + 2;
        while end < self.bytes.len() {
            if self.bytes[end] == b'*' && self.bytes.get(end + 1) == Some(&b'/') {
                end += 2;
                break;
            }
            end += 1;
        }
        let text = &self.bytes[start..end.min(self.bytes.len())];
        let kind = if self.language == Language::Java && text.starts_with(b"/**") && text != b"/**/"
        {
            ElementKind::CommentJavadoc
        } else {
            ElementKind::CommentBlock
        };
        self.queue.push_back(MarkupToken::StartElement(kind));
        let owned = text.to_vec();
        self.push_text(&owned);
        self.queue.push_back(MarkupToken::EndElement(kind));
        self.pos = end.min(self.bytes.len());
        self.at_line_start = false;
    }

    fn scan_line_comment(&mut self) {
        let start = self.pos;
        let mut end = self.pos;
        while end < self.bytes.len() && self.bytes[end] != b'\n' {
            end += 1;
        }
        // the newline stays outside the comment element
        self.queue
            .push_back(MarkupToken::StartElement(ElementKind::CommentLine));
        let owned = self.bytes[start..end].to_vec();
        self.push_text(&owned);
        self.queue
            .push_back(MarkupToken::EndElement(ElementKind::CommentLine));
        self.pos = end;
        self.at_line_start = false;
    }

    fn scan_directive(&mut self) {
        let mut end = self.pos;
        while end < self.bytes.len() && self.bytes[end] != b'\n' {
            end += 1;
        }
        let line = self.bytes[self.pos..end].to_vec();
        self.pos = end;
        self.at_line_start = false;
        self.at_stmt_start = true;

        // "#", optional whitespace, directive word, rest of line
        let mut i = 1;
        while i < line.len() && (line[i] == b' ' || line[i] == b'\t') {
            i += 1;
        }
        let word_start = i;
        while i < line.len() && line[i].is_ascii_alphabetic() {
            i += 1;
        }
        let word = String::from_utf8_lossy(&line[word_start..i]).into_owned();

        let wrapper = match word.as_str() {
            "include" => ElementKind::CppInclude,
            "define" => ElementKind::CppDefine,
            "if" => ElementKind::CppIf,
            "ifdef" => ElementKind::CppIfdef,
            "ifndef" => ElementKind::CppIfndef,
            "else" => ElementKind::CppElse,
            "elif" => ElementKind::CppElif,
            "endif" => ElementKind::CppEndif,
            "pragma" => ElementKind::CppPragma,
            "error" => ElementKind::CppError,
            "undef" => ElementKind::CppUndef,
            _ => ElementKind::CppLine,
        };

        self.queue.push_back(MarkupToken::StartElement(wrapper));
        self.push_text(&line[..word_start]); // "#" and any spacing
        if !word.is_empty() {
            self.queue
                .push_back(MarkupToken::StartElement(ElementKind::CppDirective));
            self.push_text(word.as_bytes());
            self.queue
                .push_back(MarkupToken::EndElement(ElementKind::CppDirective));
        }

        let rest = &line[i..];
        if wrapper == ElementKind::CppInclude {
            self.push_include_rest(rest);
        } else {
            self.push_text(rest);
        }
        self.queue.push_back(MarkupToken::EndElement(wrapper));
    }

    /// Mark the `"file"` or `<file>` target of an include line
    fn push_include_rest(&mut self, rest: &[u8]) {
        let mut i = 0;
        while i < rest.len() && (rest[i] == b' ' || rest[i] == b'\t') {
            i += 1;
        }
        if i < rest.len() && (rest[i] == b'"' || rest[i] == b'<') {
            let close = if rest[i] == b'"' { b'"' } else { b'>' };
            let mut j = i + 1;
            while j < rest.len() && rest[j] != close {
                j += 1;
            }
            if j < rest.len() {
                j += 1;
                self.push_text(&rest[..i]);
                self.queue
                    .push_back(MarkupToken::StartElement(ElementKind::CppFile));
                self.push_text(&rest[i..j]);
                self.queue
                    .push_back(MarkupToken::EndElement(ElementKind::CppFile));
                self.push_text(&rest[j..]);
                return;
            }
        }
        self.push_text(rest);
    }

    fn scan_string(&mut self, quote: u8, kind: ElementKind) {
        let start = self.pos;
        let mut end = self.pos + 1;
        while end < self.bytes.len() {
            match self.bytes[end] {
                b'\\' if end + 1 < self.bytes.len() => end += 2,
                b if b == quote => {
                    end += 1;
                    break;
                }
                b'\n' => break, // unterminated on this line; stop cleanly
                _ => end += 1,
            }
        }
        let owned = self.bytes[start..end.min(self.bytes.len())].to_vec();
        if self.config.literal_markup {
            self.queue.push_back(MarkupToken::StartElement(kind));
            self.push_text(&owned);
            self.queue.push_back(MarkupToken::EndElement(kind));
        } else {
            self.push_text(&owned);
        }
        self.pos = end.min(self.bytes.len());
        self.at_stmt_start = false;
        self.at_line_start = false;
    }

    fn scan_number(&mut self) {
        let start = self.pos;
        let mut end = self.pos;
        while end < self.bytes.len() {
            let b = self.bytes[end];
            let continues = b.is_ascii_alphanumeric()
                || b == b'.'
                || b == b'_'
                || ((b == b'+' || b == b'-')
                    && end > start
                    && matches!(self.bytes[end - 1], b'e' | b'E' | b'p' | b'P'));
            if !continues {
                break;
            }
            end += 1;
        }
        let owned = self.bytes[start..end].to_vec();
        if self.config.literal_markup {
            self.queue
                .push_back(MarkupToken::StartElement(ElementKind::LiteralNumber));
            self.push_text(&owned);
            self.queue
                .push_back(MarkupToken::EndElement(ElementKind::LiteralNumber));
        } else {
            self.push_text(&owned);
        }
        self.pos = end;
        self.at_stmt_start = false;
        self.at_line_start = false;
    }

    fn scan_identifier(&mut self) {
        let start = self.pos;
        let mut end = self.pos;
        while end < self.bytes.len() && is_ident_continue(self.bytes[end]) {
            end += 1;
        }
        let ident = String::from_utf8_lossy(&self.bytes[start..end]).into_owned();

        // `name ;` at statement level becomes an expression statement (or a
        // registered macro call followed by an empty statement)
        if self.at_stmt_start && !STMT_KEYWORDS.contains(&ident.as_str()) {
            let mut ws_end = end;
            while ws_end < self.bytes.len()
                && (self.bytes[ws_end] == b' ' || self.bytes[ws_end] == b'\t')
            {
                ws_end += 1;
            }
            if self.bytes.get(ws_end) == Some(&b';') {
                let ws = self.bytes[end..ws_end].to_vec();
                if self.config.macros.contains(&ident) {
                    self.queue
                        .push_back(MarkupToken::StartElement(ElementKind::MacroCall));
                    self.push_name(&ident);
                    self.queue
                        .push_back(MarkupToken::EndElement(ElementKind::MacroCall));
                    if !ws.is_empty() {
                        self.push_text(&ws);
                    }
                    self.queue
                        .push_back(MarkupToken::StartElement(ElementKind::EmptyStmt));
                    self.queue.push_back(MarkupToken::Text(vec![b';']));
                    self.queue
                        .push_back(MarkupToken::EndElement(ElementKind::EmptyStmt));
                } else {
                    self.queue
                        .push_back(MarkupToken::StartElement(ElementKind::ExprStmt));
                    self.queue
                        .push_back(MarkupToken::StartElement(ElementKind::Expr));
                    self.push_name(&ident);
                    self.queue.push_back(MarkupToken::EndElement(ElementKind::Expr));
                    if !ws.is_empty() {
                        self.push_text(&ws);
                    }
                    self.queue.push_back(MarkupToken::Text(vec![b';']));
                    self.queue
                        .push_back(MarkupToken::EndElement(ElementKind::ExprStmt));
                }
                self.pos = ws_end + 1;
                self.at_line_start = false;
                return;
            }
        }

        // boolean literals get markup when literal markup is on
        if self.config.literal_markup && (ident == "true" || ident == "false") {
            self.queue
                .push_back(MarkupToken::StartElement(ElementKind::LiteralBoolean));
            self.push_text(ident.as_bytes());
            self.queue
                .push_back(MarkupToken::EndElement(ElementKind::LiteralBoolean));
        } else {
            self.push_text(ident.as_bytes());
        }
        self.pos = end;
        self.at_stmt_start = false;
        self.at_line_start = false;
    }

    fn push_name(&mut self, ident: &str) {
        self.queue.push_back(MarkupToken::StartElement(ElementKind::Name));
        self.queue.push_back(MarkupToken::Text(ident.as_bytes().to_vec()));
        self.queue.push_back(MarkupToken::EndElement(ElementKind::Name));
    }
}

impl TokenProducer for SourceTokenizer<'_> {
    fn next_token(&mut self) -> Result<MarkupToken> {
        if !self.started {
            self.started = true;
            return Ok(MarkupToken::StartElement(ElementKind::Unit));
        }
        while self.queue.is_empty() && !self.finished {
            self.fill_queue();
        }
        Ok(self.queue.pop_front().unwrap_or(MarkupToken::EndOfInput))
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Control bytes XML 1.0 cannot carry as text
fn is_escape_byte(b: u8) -> bool {
    b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')
}
