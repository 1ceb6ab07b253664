//! Default assertion message catalog
//!
//! The catalog is closed: every assertion flavor selects one [`Template`] and
//! supplies its rendered arguments. An explicit, non-empty message always
//! wins; an empty explicit message falls back to the template. Supplying no
//! text is therefore the way to force the default.

/// Default message templates, one per assertion flavor
///
/// Do not reorder: the position is the template id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Fail,
    ExprFalse,
    ExprAsStringsFalse,
    IsNull,
    IsNotNull,
    IsEmpty,
    IsNotEmpty,
    FileStrMatch,
    FileMatch,
    ExpectedPanicOfType,
    UnexpectedPanicOfType,
    ExpectedPanic,
    UnexpectedPanic,
}

impl Template {
    pub const ALL: [Template; 13] = [
        Template::Fail,
        Template::ExprFalse,
        Template::ExprAsStringsFalse,
        Template::IsNull,
        Template::IsNotNull,
        Template::IsEmpty,
        Template::IsNotEmpty,
        Template::FileStrMatch,
        Template::FileMatch,
        Template::ExpectedPanicOfType,
        Template::UnexpectedPanicOfType,
        Template::ExpectedPanic,
        Template::UnexpectedPanic,
    ];

    /// Template text; `{0}`, `{1}` are replaced by the rendered arguments
    pub fn text(self) -> &'static str {
        match self {
            Self::Fail => "The conditions for this assertion were not met.",
            Self::ExprFalse => "The expression {0} is false.",
            Self::ExprAsStringsFalse => "The expression (as strings) {0} is false.",
            Self::IsNull => "{0} is null.",
            Self::IsNotNull => "{0} is not null.",
            Self::IsEmpty => "{0} is empty.",
            Self::IsNotEmpty => "{0} is not empty.",
            Self::FileStrMatch => "The file contents of {0} does not match the string \"{1}\".",
            Self::FileMatch => "The file contents of {0} does not match the file contents of {1}.",
            Self::ExpectedPanicOfType => {
                "The expression `{0}` did not panic with a payload of type `{1}`."
            }
            Self::UnexpectedPanicOfType => {
                "The expression `{0}` panicked with a payload of type `{1}`."
            }
            Self::ExpectedPanic => "The expression `{0}` did not panic.",
            Self::UnexpectedPanic => "The expression `{0}` panicked unexpectedly.",
        }
    }

    /// Number of arguments the template consumes
    pub fn arity(self) -> usize {
        match self {
            Self::Fail => 0,
            Self::FileStrMatch
            | Self::FileMatch
            | Self::ExpectedPanicOfType
            | Self::UnexpectedPanicOfType => 2,
            _ => 1,
        }
    }

    /// Substitute arguments into the template text
    ///
    /// Missing arguments render as empty text; extra ones are ignored.
    pub fn render(self, args: &[String]) -> String {
        let text = self.text();
        let mut out = String::with_capacity(text.len() + args.iter().map(String::len).sum::<usize>());
        let mut rest = text;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}').and_then(|close| {
                after[..close].parse::<usize>().ok().map(|index| (index, close))
            }) {
                Some((index, close)) => {
                    if let Some(arg) = args.get(index) {
                        out.push_str(arg);
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// What an assertion says when it is reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSpec {
    pub template: Template,
    pub args: Vec<String>,
    pub explicit: Option<String>,
}

impl MessageSpec {
    pub fn new(template: Template, args: Vec<String>) -> Self {
        Self {
            template,
            args,
            explicit: None,
        }
    }

    /// Attach caller-supplied text
    pub fn with_explicit(mut self, text: impl Into<String>) -> Self {
        self.explicit = Some(text.into());
        self
    }

    /// Final message: the explicit text when non-empty, otherwise the
    /// rendered default template
    pub fn render(&self) -> String {
        match &self.explicit {
            Some(text) if !text.is_empty() => text.clone(),
            _ => self.template.render(&self.args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_template_consumes_its_arguments() {
        for template in Template::ALL {
            let args: Vec<String> = (0..template.arity()).map(|i| format!("<arg{}>", i)).collect();
            let rendered = template.render(&args);
            for arg in &args {
                assert!(rendered.contains(arg.as_str()), "{:?}: {}", template, rendered);
            }
            assert!(!rendered.contains("{0}") && !rendered.contains("{1}"));
        }
    }

    #[test]
    fn test_render_expr_false() {
        let spec = MessageSpec::new(Template::ExprFalse, vec!["a == b".into()]);
        assert_eq!(spec.render(), "The expression a == b is false.");
    }

    #[test]
    fn test_explicit_message_overrides_default() {
        let spec = MessageSpec::new(Template::ExprFalse, vec!["x".into()]).with_explicit("bad value: 3");
        assert_eq!(spec.render(), "bad value: 3");
    }

    #[test]
    fn test_empty_explicit_message_falls_back_to_default() {
        let spec = MessageSpec::new(Template::IsEmpty, vec!["name".into()]).with_explicit("");
        assert_eq!(spec.render(), "name is empty.");
    }

    #[test]
    fn test_missing_arguments_render_empty() {
        assert_eq!(
            Template::FileMatch.render(&["a.txt".into()]),
            "The file contents of a.txt does not match the file contents of ."
        );
    }

    #[test]
    fn test_braces_in_arguments_are_literal() {
        assert_eq!(
            Template::ExprFalse.render(&["v == vec!{0}".into()]),
            "The expression v == vec!{0} is false."
        );
    }
}
