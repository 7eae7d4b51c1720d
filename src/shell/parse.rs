use crate::shell::command::Command;

pub fn parse_command(input: &str) -> Option<Command> {
    let tokens: Vec<&str> = input.split_ascii_whitespace().collect();
    let (&cmd, args) = tokens.split_first()?;
    let arg = |i: usize| args.get(i).map(|s| s.to_string());

    match cmd {
        "help" => Some(Command::Help),
        "ls" => Some(Command::Ls(arg(0))),
        "pwd" => Some(Command::Pwd),
        "mkdir" => arg(0).map(Command::Mkdir),
        "rmdir" => arg(0).map(Command::Rmdir),
        "create" => arg(0).map(Command::Create),
        "rm" => arg(0).map(Command::Rm),
        "cd" => Some(Command::Cd(arg(0).unwrap_or_else(|| "/".to_string()))),
        "read" => arg(0).map(Command::Read),
        "write" => {
            if args.len() >= 2 {
                Some(Command::Write(args[0].to_string(), args[1..].join(" ")))
            } else {
                None
            }
        }
        "stat" => arg(0).map(Command::Stat),
        "mv" => Some(Command::Mv(arg(0)?, arg(1)?)),
        "rename" => Some(Command::Rename(arg(0)?, arg(1)?)),
        "tree" => Some(Command::Tree(arg(0))),
        "df" => Some(Command::Df),
        "format" => Some(Command::Format),
        "exit" | "quit" => Some(Command::Exit),
        _ => None,
    }
}

/// 相对路径基于当前目录展开，并消去 `.` 和 `..`
pub fn resolve_path(current_dir: &str, arg: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let base = if arg.starts_with('/') { "" } else { current_dir };
    for segment in base.split('/').chain(arg.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    format!("/{}", parts.join("/"))
}

/// 拆成 (父目录, 最后一段名字)
pub fn split_parent(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}
