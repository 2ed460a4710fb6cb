//! Install catalog keyed by canonical tool name.
//!
//! Commands are either idempotent (already installed means success) or
//! guarded with `command -v`. PATH additions name the directories a fresh
//! install lands in, so suggestions can offer a ready-to-paste export.

/// Per-OS install commands and PATH additions for one tool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ToolInstaller {
    /// Install command on macOS.
    pub darwin: &'static str,
    /// Install command on Linux.
    pub linux: &'static str,
    /// Directories the install adds binaries to.
    pub path_additions: &'static [&'static str],
}

const CATALOG: &[(&str, ToolInstaller)] = &[
    (
        "go",
        ToolInstaller {
            darwin: "brew install go",
            linux: "sudo apt-get install -y golang-go",
            path_additions: &["$HOME/go/bin", "/usr/local/go/bin"],
        },
    ),
    (
        "cargo",
        ToolInstaller {
            darwin: "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y",
            linux: "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y",
            path_additions: &["$HOME/.cargo/bin"],
        },
    ),
    (
        "rustc",
        ToolInstaller {
            darwin: "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y",
            linux: "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y",
            path_additions: &["$HOME/.cargo/bin"],
        },
    ),
    (
        "node",
        ToolInstaller {
            darwin: "brew install node",
            linux: "sudo apt-get install -y nodejs",
            path_additions: &["$HOME/.nvm/current/bin"],
        },
    ),
    (
        "npm",
        ToolInstaller {
            darwin: "brew install node",
            linux: "sudo apt-get install -y npm",
            path_additions: &["$HOME/.nvm/current/bin"],
        },
    ),
    (
        "yarn",
        ToolInstaller {
            darwin: "if ! command -v yarn >/dev/null; then npm install -g yarn; fi",
            linux: "if ! command -v yarn >/dev/null; then npm install -g yarn; fi",
            path_additions: &[],
        },
    ),
    (
        "pnpm",
        ToolInstaller {
            darwin: "if ! command -v pnpm >/dev/null; then npm install -g pnpm; fi",
            linux: "if ! command -v pnpm >/dev/null; then npm install -g pnpm; fi",
            path_additions: &[],
        },
    ),
    (
        "bun",
        ToolInstaller {
            darwin: "curl -fsSL https://bun.sh/install | bash",
            linux: "curl -fsSL https://bun.sh/install | bash",
            path_additions: &["$HOME/.bun/bin"],
        },
    ),
    (
        "deno",
        ToolInstaller {
            darwin: "curl -fsSL https://deno.land/install.sh | sh",
            linux: "curl -fsSL https://deno.land/install.sh | sh",
            path_additions: &["$HOME/.deno/bin"],
        },
    ),
    (
        "python3",
        ToolInstaller {
            darwin: "brew install python",
            linux: "sudo apt-get install -y python3",
            path_additions: &["$HOME/.pyenv/shims"],
        },
    ),
    (
        "pip3",
        ToolInstaller {
            darwin: "brew install python",
            linux: "sudo apt-get install -y python3-pip",
            path_additions: &[],
        },
    ),
    (
        "pytest",
        ToolInstaller {
            darwin: "pip3 install pytest",
            linux: "pip3 install pytest",
            path_additions: &["$HOME/.local/bin"],
        },
    ),
    (
        "make",
        ToolInstaller {
            darwin: "xcode-select --install",
            linux: "sudo apt-get install -y make",
            path_additions: &[],
        },
    ),
    (
        "gcc",
        ToolInstaller {
            darwin: "xcode-select --install",
            linux: "sudo apt-get install -y build-essential",
            path_additions: &[],
        },
    ),
    (
        "git",
        ToolInstaller {
            darwin: "brew install git",
            linux: "sudo apt-get install -y git",
            path_additions: &[],
        },
    ),
    (
        "rsync",
        ToolInstaller {
            darwin: "brew install rsync",
            linux: "sudo apt-get install -y rsync",
            path_additions: &[],
        },
    ),
    (
        "jq",
        ToolInstaller {
            darwin: "brew install jq",
            linux: "sudo apt-get install -y jq",
            path_additions: &[],
        },
    ),
    (
        "rg",
        ToolInstaller {
            darwin: "brew install ripgrep",
            linux: "sudo apt-get install -y ripgrep",
            path_additions: &[],
        },
    ),
    (
        "docker",
        ToolInstaller {
            darwin: "brew install --cask docker",
            linux: "curl -fsSL https://get.docker.com | sh",
            path_additions: &[],
        },
    ),
];

/// Looks up the installer entry for a canonical tool name.
#[must_use]
pub fn installer(tool: &str) -> Option<&'static ToolInstaller> {
    CATALOG
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(_, entry)| entry)
}

/// Returns `true` when the catalog knows how to install `tool`.
#[must_use]
pub fn can_install(tool: &str) -> bool {
    installer(tool).is_some()
}

/// Returns the install command for `tool` on the current OS.
#[must_use]
pub fn install_command(tool: &str) -> Option<&'static str> {
    installer(tool).map(|entry| {
        if cfg!(target_os = "macos") {
            entry.darwin
        } else {
            entry.linux
        }
    })
}

/// Renders an install command as a short human-readable description by
/// recognising common packaging idioms.
#[must_use]
pub fn describe_install_command(command: &str) -> String {
    if let Some(package) = command.strip_prefix("brew install ") {
        return format!("Homebrew package '{}'", package.trim_start_matches("--cask "));
    }
    if let Some(pos) = command.find("apt-get install") {
        let tail = command.get(pos..).unwrap_or(command);
        let package = tail.split_whitespace().last().unwrap_or(command);
        return format!("APT package '{package}'");
    }
    if command.contains("rustup") || command.contains("sh.rustup.rs") {
        return String::from("the rustup installer");
    }
    if command.starts_with("curl ") && (command.contains("| sh") || command.contains("| bash")) {
        return String::from("the vendor install script");
    }
    format!("`{command}`")
}
