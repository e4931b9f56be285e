//! Interactive evaluation shell.
//!
//! The execution handle is released around the blocking line read so
//! dispatched callbacks and timers stay serviceable while the prompt waits.
//! Incomplete chunks accumulate continuation lines; complete chunks are
//! evaluated with an implicit `return` fallback and their results printed in
//! their canonical textual form.

use crate::runtime::convert::unpack;
use crate::runtime::environment::Environment;
use crate::runtime::error::Error;
use mlua::{MultiValue, Value as LuaValue};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;

pub fn run_repl(env: &Arc<Environment>) -> Result<(), Error> {
    let mut editor = DefaultEditor::new()
        .map_err(|err| Error::Io(std::io::Error::other(err.to_string())))?;
    let mut code = String::new();

    loop {
        let prompt = if code.is_empty() { "> " } else { ">> " };

        env.handle().unlock();
        let line = editor.readline(prompt);
        env.handle().lock();

        match line {
            Ok(line) => {
                if code.is_empty() {
                    code = line;
                } else {
                    code.push('\n');
                    code.push_str(&line);
                }
            }
            Err(ReadlineError::Eof) => return Ok(()),
            Err(ReadlineError::Interrupted) => {
                println!("keyboard interrupt");
                code.clear();
                continue;
            }
            Err(err) => return Err(Error::Io(std::io::Error::other(err.to_string()))),
        }

        match env.lua().load(&code).set_name("repl").eval::<MultiValue>() {
            Ok(values) => {
                let _ = editor.add_history_entry(&code);
                if is_exit_word(&code) && all_nil(&values) {
                    println!("Use os.exit() or Ctrl-D to exit.");
                } else if let Some(rendered) = render(&values) {
                    println!("{rendered}");
                }
                code.clear();
            }
            Err(mlua::Error::SyntaxError {
                incomplete_input: true,
                ..
            }) => {
                // Keep reading continuation lines.
            }
            Err(err) => {
                let _ = editor.add_history_entry(&code);
                println!("{}", Error::from_lua(err));
                code.clear();
            }
        }
    }
}

fn is_exit_word(code: &str) -> bool {
    matches!(code.trim(), "exit" | "quit" | "bye")
}

fn all_nil(values: &MultiValue) -> bool {
    values.iter().all(|value| matches!(value, LuaValue::Nil))
}

fn render(values: &MultiValue) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    let parts: Vec<String> = values
        .iter()
        .map(|value| match unpack(value) {
            Ok(value) => value.to_string(),
            Err(_) => value.type_name().to_string(),
        })
        .collect();
    Some(parts.join("\t"))
}
