use std::collections::{HashMap, HashSet};

use sigil::expression::Expr;
use sigil::instruction::{Instruction, LoopKind};
use sigil::parser::Parser;

use crate::cache::SourceCache;
use crate::context::{Context, Frame};
use crate::error::{EngineError, EngineWarning, EvalError};
use crate::eval::evaluate;
use crate::reader::ReaderRegistry;
use crate::value::{Builtin, Function, Value};

/// Nesting limit for execution frames, counting both inclusions and macro
/// expansions. This is the cycle-detection fallback.
pub const MAX_EXECUTION_DEPTH: usize = 256;

/// A declared macro, keyed by name in the machine's macro table. Origin
/// fields record where the declaration lexically lives; the body executes
/// with that provenance, not the call site's.
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub parameters: Vec<String>,
    pub body: Vec<Instruction>,
    pub file: String,
    pub path: String,
    pub line: usize,
}

/// The execution machine: walks the instruction list, evaluating directives,
/// expanding macros and inclusions into an append-only output buffer.
///
/// Not reentrant — `execute` resets all transient state at its start. A
/// caller requiring parallelism needs independent machine instances.
pub struct Machine {
    parser: Parser,
    readers: ReaderRegistry,
    cache: SourceCache,

    /// Lowest-precedence layer: `__FILE__`/`__PATH__` defaults plus the
    /// built-in functions.
    base: Frame,
    /// Variables assigned by `@set` and macro callables. Reset per execution.
    globals: Frame,
    locals: Context,
    macros: HashMap<String, MacroDef>,
    included: HashSet<String>,

    depth: usize,
    last_file: Option<String>,
    warnings: Vec<EngineWarning>,

    /// Emit `#line <n> "<source>"` at file boundaries.
    pub generate_line_control: bool,

    file: String,
    path: String,
}

impl Machine {
    pub fn new(readers: ReaderRegistry) -> Self {
        Machine {
            parser: Parser::new(),
            readers,
            cache: SourceCache::new(),
            base: Frame::new(),
            globals: Frame::new(),
            locals: Context::new(),
            macros: HashMap::new(),
            included: HashSet::new(),
            depth: 0,
            last_file: None,
            warnings: Vec::new(),
            generate_line_control: false,
            file: "main".to_string(),
            path: String::new(),
        }
    }

    /// Name the top-level source for `__FILE__`/`__PATH__` and error
    /// provenance. Defaults to `main` with an empty path.
    pub fn set_origin(&mut self, file: impl Into<String>, path: impl Into<String>) {
        self.file = file.into();
        self.path = path.into();
    }

    /// Warnings collected by `@warning` during the last execution.
    pub fn warnings(&self) -> &[EngineWarning] {
        &self.warnings
    }

    pub fn cache_mut(&mut self) -> &mut SourceCache {
        &mut self.cache
    }

    /// Preprocess `source` and return the expanded text.
    pub fn execute(&mut self, source: &str) -> Result<String, EngineError> {
        self.execute_with(source, Frame::new())
    }

    /// Preprocess with a caller-supplied context. The context layers, lowest
    /// to highest precedence: `__FILE__`/`__PATH__` defaults, built-ins,
    /// globals, the supplied frame.
    pub fn execute_with(&mut self, source: &str, context: Frame) -> Result<String, EngineError> {
        self.globals.clear();
        self.macros.clear();
        self.included.clear();
        self.locals.clear();
        self.warnings.clear();
        self.depth = 0;
        self.last_file = None;
        self.base = self.base_frame();

        self.parser.file = self.file.clone();
        let instructions = self.parser.parse(source)?;

        self.locals.push(context);
        let mut out = Vec::new();
        let result = self.exec_block(&instructions, &mut out);
        self.locals.pop();
        result?;
        Ok(out.concat())
    }

    fn base_frame(&self) -> Frame {
        let mut base = Frame::new();
        base.insert("__FILE__".to_string(), Value::Str(self.file.clone()));
        base.insert("__PATH__".to_string(), Value::Str(self.path.clone()));
        for (name, builtin) in [
            ("min", Builtin::Min),
            ("max", Builtin::Max),
            ("abs", Builtin::Abs),
            ("defined", Builtin::Defined),
            ("include", Builtin::Include),
        ] {
            base.insert(
                name.to_string(),
                Value::Function(Function::Builtin(builtin)),
            );
        }
        base
    }

    /// Context lookup: local frames innermost-out, then globals, then the
    /// base layer.
    pub(crate) fn lookup(&self, name: &str) -> Option<&Value> {
        self.locals
            .get(name)
            .or_else(|| self.globals.get(name))
            .or_else(|| self.base.get(name))
    }

    fn current_file(&self) -> String {
        match self.lookup("__FILE__") {
            Some(Value::Str(s)) => s.clone(),
            _ => self.file.clone(),
        }
    }

    fn current_path(&self) -> String {
        match self.lookup("__PATH__") {
            Some(Value::Str(s)) => s.clone(),
            _ => self.path.clone(),
        }
    }

    fn current_line(&self) -> usize {
        match self.lookup("__LINE__") {
            Some(Value::Number(n)) => *n as usize,
            _ => 0,
        }
    }

    fn is_inline(&self) -> bool {
        matches!(self.lookup("__INLINE__"), Some(Value::Bool(true)))
    }

    /// Evaluate an expression, enriching plain evaluation failures with the
    /// current file:line. Failures that already carry provenance (from a
    /// nested expansion) propagate unchanged.
    fn eval(&mut self, expr: &Expr) -> Result<Value, EngineError> {
        evaluate(expr, self).map_err(|e| match e {
            EvalError::Engine(inner) => *inner,
            EvalError::Message(message) => EngineError::ExpressionEvaluation {
                message,
                file: self.current_file(),
                line: self.current_line(),
            },
        })
    }

    /// Execute one instruction list. The depth counter is incremented on
    /// entry and decremented on exit; exceeding the limit fails rather than
    /// overflowing the stack on cyclic inclusion.
    fn exec_block(
        &mut self,
        instructions: &[Instruction],
        out: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        self.depth += 1;
        if self.depth > MAX_EXECUTION_DEPTH {
            self.depth -= 1;
            let line = instructions
                .first()
                .map(Instruction::line)
                .unwrap_or_else(|| self.current_line());
            return Err(EngineError::MaxExecutionDepthReached {
                file: self.current_file(),
                line,
            });
        }
        let result = self.exec_block_inner(instructions, out);
        self.depth -= 1;
        result
    }

    fn exec_block_inner(
        &mut self,
        instructions: &[Instruction],
        out: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        for instruction in instructions {
            self.locals
                .set("__LINE__", Value::Number(instruction.line() as f64));
            self.exec_instruction(instruction, out)?;
        }
        Ok(())
    }

    fn exec_instruction(
        &mut self,
        instruction: &Instruction,
        out: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        match instruction {
            Instruction::Text { content, .. } => {
                self.emit(content.clone(), out);
                Ok(())
            }

            Instruction::Inline { value, .. } => {
                let result = self.eval(value)?;
                self.emit(result.to_string(), out);
                Ok(())
            }

            Instruction::Set {
                variable, value, ..
            } => {
                let result = self.eval(value)?;
                self.globals.insert(variable.clone(), result);
                Ok(())
            }

            Instruction::Include { value, once, .. } => {
                // A call to a declared macro is a macro inclusion; anything
                // else evaluates to a source reference.
                if let Expr::Call { callee, args } = value {
                    if let Some(def) = self.macros.get(callee.as_str()).cloned() {
                        let mut values = Vec::with_capacity(args.len());
                        for arg in args {
                            values.push(self.eval(arg)?);
                        }
                        return self.run_macro(&def, values, false, out);
                    }
                }
                let reference = self.eval(value)?.to_string().trim().to_string();
                if *once && self.included.contains(&reference) {
                    return Ok(());
                }
                self.include_source(&reference, out)
            }

            Instruction::Conditional {
                test,
                consequent,
                elseifs,
                alternate,
                ..
            } => {
                let value = self.eval(test)?;
                if value.is_truthy() {
                    return self.exec_block(consequent, out);
                }
                for branch in elseifs {
                    self.locals
                        .set("__LINE__", Value::Number(branch.line as f64));
                    let value = self.eval(&branch.test)?;
                    if value.is_truthy() {
                        return self.exec_block(&branch.body, out);
                    }
                }
                if let Some(alternate) = alternate {
                    return self.exec_block(alternate, out);
                }
                Ok(())
            }

            Instruction::Loop {
                kind,
                condition,
                body,
                line,
            } => {
                let mut index = 0usize;
                loop {
                    self.locals.set("__LINE__", Value::Number(*line as f64));
                    let value = self.eval(condition)?;
                    let done = match kind {
                        LoopKind::While => value.is_falsy(),
                        LoopKind::Repeat => value == Value::Number(index as f64),
                    };
                    if done {
                        break;
                    }

                    let mut entry = HashMap::new();
                    entry.insert("index".to_string(), Value::Number(index as f64));
                    entry.insert("iteration".to_string(), Value::Number((index + 1) as f64));
                    let mut frame = Frame::new();
                    frame.insert("loop".to_string(), Value::Object(entry));

                    self.locals.push(frame);
                    let result = self.exec_block(body, out);
                    self.locals.pop();
                    result?;
                    index += 1;
                }
                Ok(())
            }

            Instruction::Macro {
                name,
                parameters,
                body,
                line,
            } => {
                if let Some(existing) = self.macros.get(name) {
                    return Err(EngineError::MacroAlreadyDeclared {
                        name: name.clone(),
                        original_file: existing.file.clone(),
                        original_line: existing.line,
                        file: self.current_file(),
                        line: *line,
                    });
                }
                let def = MacroDef {
                    name: name.clone(),
                    parameters: parameters.clone(),
                    body: body.clone(),
                    file: self.current_file(),
                    path: self.current_path(),
                    line: *line,
                };
                self.macros.insert(name.clone(), def);
                // Expressions may invoke the macro as a function returning
                // its expanded body.
                self.globals
                    .insert(name.clone(), Value::Function(Function::Macro(name.clone())));
                Ok(())
            }

            Instruction::Error { value, .. } => {
                let message = self.eval(value)?.to_string();
                Err(EngineError::UserDefined { message })
            }

            Instruction::Warning { value, line } => {
                let message = self.eval(value)?.to_string();
                self.warnings.push(EngineWarning {
                    message,
                    file: self.current_file(),
                    line: *line,
                });
                Ok(())
            }
        }
    }

    /// Resolve, read, parse and execute an included source into `out`.
    fn include_source(
        &mut self,
        reference: &str,
        out: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        let file = self.current_file();
        let line = self.current_line();

        let read_result = match self.readers.select(reference) {
            Ok(reader) => self.cache.read(reader, reference),
            Err(e) => Err(e),
        };
        let (content, parsed) = read_result.map_err(|e| EngineError::SourceInclusion {
            message: e.to_string(),
            file,
            line,
        })?;

        self.parser.file = parsed.file.clone();
        let instructions = self.parser.parse(&content)?;
        self.included.insert(reference.to_string());

        let mut frame = Frame::new();
        frame.insert("__FILE__".to_string(), Value::Str(parsed.file));
        frame.insert("__PATH__".to_string(), Value::Str(parsed.path));
        self.locals.push(frame);
        let result = self.exec_block(&instructions, out);
        self.locals.pop();
        result
    }

    /// Execute a macro body with positional parameter bindings. Excess
    /// arguments are discarded; missing parameters bind to Null.
    fn run_macro(
        &mut self,
        def: &MacroDef,
        args: Vec<Value>,
        inline: bool,
        out: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        let mut frame = Frame::new();
        for (i, parameter) in def.parameters.iter().enumerate() {
            frame.insert(
                parameter.clone(),
                args.get(i).cloned().unwrap_or(Value::Null),
            );
        }
        frame.insert("__FILE__".to_string(), Value::Str(def.file.clone()));
        frame.insert("__PATH__".to_string(), Value::Str(def.path.clone()));
        if inline {
            frame.insert("__INLINE__".to_string(), Value::Bool(true));
        }
        self.locals.push(frame);
        let result = self.exec_block(&def.body, out);
        self.locals.pop();
        result
    }

    /// Expand a macro in inline mode: fresh buffer, origin provenance, one
    /// trailing newline trimmed. This is the expression-facing callable.
    pub(crate) fn expand_macro_inline(
        &mut self,
        name: &str,
        args: Vec<Value>,
    ) -> Result<String, EngineError> {
        let def = match self.macros.get(name) {
            Some(def) => def.clone(),
            None => {
                return Err(EngineError::ExpressionEvaluation {
                    message: format!("Function \"{}\" is not defined", name),
                    file: self.current_file(),
                    line: self.current_line(),
                });
            }
        };
        let mut buffer = Vec::new();
        self.run_macro(&def, args, true, &mut buffer)?;
        let mut expanded = buffer.concat();
        if expanded.ends_with('\n') {
            expanded.pop();
        }
        Ok(expanded)
    }

    /// Expand a source reference as inline text (the `include()` built-in).
    pub(crate) fn include_inline(&mut self, reference: &str) -> Result<String, EngineError> {
        let mut frame = Frame::new();
        frame.insert("__INLINE__".to_string(), Value::Bool(true));
        self.locals.push(frame);
        let mut buffer = Vec::new();
        let result = self.include_source(reference, &mut buffer);
        self.locals.pop();
        result?;
        let mut expanded = buffer.concat();
        if expanded.ends_with('\n') {
            expanded.pop();
        }
        Ok(expanded)
    }

    /// Append a chunk to the output buffer, prepending a `#line` control
    /// statement at file boundaries when enabled and not in inline mode.
    fn emit(&mut self, chunk: String, out: &mut Vec<String>) {
        if self.generate_line_control && !self.is_inline() {
            let file = self.current_file();
            if self.last_file.as_deref() != Some(file.as_str()) {
                let path = self.current_path();
                let source = if path.is_empty() {
                    file.clone()
                } else {
                    format!("{}/{}", path, file)
                };
                out.push(format!(
                    "#line {} \"{}\"\n",
                    self.current_line(),
                    source.replace('"', "\\\"")
                ));
                self.last_file = Some(file);
            }
        }
        out.push(chunk);
    }
}
