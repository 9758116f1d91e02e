use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::ast::SubtagCall;
use crate::eval::context::ExecutionContext;
use crate::eval::error::{RuntimeError, SubtagResult};
use crate::eval::side_effects::OutputReplacement;
use crate::subtag::{check_args, OutputSink, Subtag};

/// `{inject;code}` parses and runs text produced at runtime as its own tag.
pub struct Inject;

#[async_trait]
impl Subtag for Inject {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 1, Some(1))?;
        let code = ctx.eval_arg(call, 0).await?;
        let engine = ctx.engine().clone();
        out.push(engine.run(ctx, &code, true).await?);
        Ok(())
    }
}

/// Parses `/pattern/flags`. Returns the regex and whether `g` was given.
fn parse_regex(text: &str) -> Result<(Regex, bool), RuntimeError> {
    let invalid = || RuntimeError::custom("Invalid regex");
    let body = text.trim().strip_prefix('/').ok_or_else(invalid)?;
    let end = body.rfind('/').ok_or_else(invalid)?;
    let (pattern, flags) = (&body[..end], &body[end + 1..]);

    let mut builder = RegexBuilder::new(pattern);
    let mut global = false;
    for flag in flags.chars() {
        match flag {
            'g' => global = true,
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'u' => {
                builder.unicode(true);
            }
            _ => return Err(invalid()),
        }
    }
    let regex = builder
        .build()
        .map_err(|e| invalid().with_detail(e.to_string()))?;
    Ok((regex, global))
}

/// `{regexreplace;[text];/regex/flags;replacement}`. Without `text` the replacement is
/// applied to the final output of the outermost tag.
pub struct RegexReplace;

#[async_trait]
impl Subtag for RegexReplace {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 2, Some(3))?;
        let mut args = Vec::with_capacity(call.args.len());
        for index in 0..call.args.len() {
            args.push(ctx.eval_arg(call, index).await?);
        }

        match args.as_slice() {
            [pattern, with] => {
                let (regex, global) = parse_regex(pattern)?;
                ctx.side_effects().lock().await.replace = Some(OutputReplacement {
                    regex,
                    with: with.clone(),
                    global,
                });
            }
            [text, pattern, with] => {
                let (regex, global) = parse_regex(pattern)?;
                let replacement = OutputReplacement {
                    regex,
                    with: with.clone(),
                    global,
                };
                out.push(replacement.apply(text).into_owned());
            }
            _ => {}
        }
        Ok(())
    }
}

/// `{debug;text}` adds an entry to the debug trail without producing output.
pub struct Debug;

#[async_trait]
impl Subtag for Debug {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        _out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 1, Some(1))?;
        let text = ctx.eval_arg(call, 0).await?;
        ctx.add_debug(text);
        Ok(())
    }
}
