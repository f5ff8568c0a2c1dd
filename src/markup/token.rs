//! Markup token stream
//!
//! The contract between a language grammar and the XML emitter: a linear
//! sequence of tagged tokens. Exactly one `UnitStart`/`UnitEnd` pair frames a
//! unit; the `Text` tokens between them partition the source bytes so that
//! their concatenation reproduces the input exactly.

use crate::core::error::Result;

/// Namespace an element kind lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupNs {
    Src,
    Cpp,
    /// Extension namespace for literal markup
    Literal,
}

/// Element identity: namespace, local name, and fixed attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Translation unit; starting one triggers the emitter's framing decision
    Unit,
    /// `<comment type="block">`
    CommentBlock,
    /// `<comment type="line">`
    CommentLine,
    /// `<comment type="javadoc">`
    CommentJavadoc,
    /// `<literal type="string">`
    LiteralString,
    /// `<literal type="char">`
    LiteralChar,
    /// `<literal type="number">`
    LiteralNumber,
    /// `<literal type="boolean">`
    LiteralBoolean,
    ExprStmt,
    Expr,
    Name,
    EmptyStmt,
    MacroCall,
    /// `<cpp:include>` wrapping a whole include line
    CppInclude,
    /// `<cpp:file>` around the include target
    CppFile,
    /// `<cpp:directive>` around the `#word` keyword
    CppDirective,
    /// `<cpp:define>`
    CppDefine,
    /// `<cpp:if>` family wrappers for the remaining directive lines
    CppIf,
    CppIfdef,
    CppIfndef,
    CppElse,
    CppElif,
    CppEndif,
    CppPragma,
    CppError,
    CppUndef,
    /// Generic wrapper for directives without a dedicated kind
    CppLine,
}

impl ElementKind {
    pub fn ns(&self) -> MarkupNs {
        use ElementKind::*;
        match self {
            CppInclude | CppFile | CppDirective | CppDefine | CppIf | CppIfdef | CppIfndef
            | CppElse | CppElif | CppEndif | CppPragma | CppError | CppUndef | CppLine => {
                MarkupNs::Cpp
            }
            LiteralString | LiteralChar | LiteralNumber | LiteralBoolean => MarkupNs::Literal,
            _ => MarkupNs::Src,
        }
    }

    pub fn local_name(&self) -> &'static str {
        use ElementKind::*;
        match self {
            Unit => "unit",
            CommentBlock | CommentLine | CommentJavadoc => "comment",
            LiteralString | LiteralChar | LiteralNumber | LiteralBoolean => "literal",
            ExprStmt => "expr_stmt",
            Expr => "expr",
            Name => "name",
            EmptyStmt => "empty_stmt",
            MacroCall => "macro",
            CppInclude => "include",
            CppFile => "file",
            CppDirective => "directive",
            CppDefine => "define",
            CppIf => "if",
            CppIfdef => "ifdef",
            CppIfndef => "ifndef",
            CppElse => "else",
            CppElif => "elif",
            CppEndif => "endif",
            CppPragma => "pragma",
            CppError => "error",
            CppUndef => "undef",
            CppLine => "directive",
        }
    }

    /// Attributes baked into the kind, emitted right after the tag name
    pub fn fixed_attributes(&self) -> &'static [(&'static str, &'static str)] {
        use ElementKind::*;
        match self {
            CommentBlock => &[("type", "block")],
            CommentLine => &[("type", "line")],
            CommentJavadoc => &[("type", "javadoc")],
            LiteralString => &[("type", "string")],
            LiteralChar => &[("type", "char")],
            LiteralNumber => &[("type", "number")],
            LiteralBoolean => &[("type", "boolean")],
            _ => &[],
        }
    }
}

/// One item in the markup token stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupToken {
    StartElement(ElementKind),
    EndElement(ElementKind),
    /// Start and end with no children
    EmptyElement(ElementKind),
    /// Verbatim source bytes; `&`, `<`, `>` escaped on output and nothing else
    Text(Vec<u8>),
    /// A control byte with no XML representation; becomes `<escape char="0x…"/>`
    Escape(u8),
    EndOfInput,
}

/// Producer side of the token-stream contract
pub trait TokenProducer {
    fn next_token(&mut self) -> Result<MarkupToken>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(ElementKind::ExprStmt.local_name(), "expr_stmt");
        assert_eq!(ElementKind::CommentBlock.local_name(), "comment");
        assert_eq!(ElementKind::CppInclude.local_name(), "include");
    }

    #[test]
    fn test_kind_namespaces() {
        assert_eq!(ElementKind::Name.ns(), MarkupNs::Src);
        assert_eq!(ElementKind::CppEndif.ns(), MarkupNs::Cpp);
    }

    #[test]
    fn test_fixed_attributes() {
        assert_eq!(
            ElementKind::CommentLine.fixed_attributes(),
            &[("type", "line")]
        );
        assert!(ElementKind::Expr.fixed_attributes().is_empty());
    }
}
