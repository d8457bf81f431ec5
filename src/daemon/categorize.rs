//! Turns the raw identifiers reported by the platform into something a person would recognize,
//! and assigns each application a [Category].

use std::fmt::Display;

use serde::{Deserialize, Serialize};

pub const UNKNOWN_APPLICATION: &str = "UNKNOWN";
pub const DEFAULT_WINDOW_TITLE_MAX_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Browser,
    Development,
    Communication,
    Productivity,
    Entertainment,
    Design,
    Other,
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::Browser => "Browser",
            Category::Development => "Development",
            Category::Communication => "Communication",
            Category::Productivity => "Productivity",
            Category::Entertainment => "Entertainment",
            Category::Design => "Design",
            Category::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Annotates sessions with a category. Never affects segmentation.
pub trait CategoryResolver: Send + Sync {
    fn categorize(&self, app_name: &str, window_title: &str) -> Category;
}

/// Executable names (lowercase, without extension) mapped to display names.
const KNOWN_APPLICATIONS: &[(&str, &str)] = &[
    ("chrome", "Google Chrome"),
    ("google-chrome", "Google Chrome"),
    ("google-chrome-stable", "Google Chrome"),
    ("chromium", "Chromium"),
    ("chromium-browser", "Chromium"),
    ("firefox", "Firefox"),
    ("msedge", "Microsoft Edge"),
    ("microsoft-edge", "Microsoft Edge"),
    ("brave", "Brave"),
    ("opera", "Opera"),
    ("safari", "Safari"),
    ("code", "Visual Studio Code"),
    ("devenv", "Visual Studio"),
    ("idea", "IntelliJ IDEA"),
    ("idea64", "IntelliJ IDEA"),
    ("pycharm", "PyCharm"),
    ("pycharm64", "PyCharm"),
    ("nvim", "Neovim"),
    ("vim", "Vim"),
    ("windowsterminal", "Windows Terminal"),
    ("gnome-terminal-server", "Terminal"),
    ("slack", "Slack"),
    ("teams", "Microsoft Teams"),
    ("ms-teams", "Microsoft Teams"),
    ("discord", "Discord"),
    ("zoom", "Zoom"),
    ("telegram", "Telegram"),
    ("outlook", "Microsoft Outlook"),
    ("winword", "Microsoft Word"),
    ("excel", "Microsoft Excel"),
    ("powerpnt", "Microsoft PowerPoint"),
    ("notion", "Notion"),
    ("obsidian", "Obsidian"),
    ("soffice.bin", "LibreOffice"),
    ("spotify", "Spotify"),
    ("vlc", "VLC"),
    ("figma", "Figma"),
    ("photoshop", "Adobe Photoshop"),
    ("illustrator", "Adobe Illustrator"),
    ("gimp", "GIMP"),
    ("explorer", "File Explorer"),
];

/// Display names mapped to categories.
const APPLICATION_CATEGORIES: &[(&str, Category)] = &[
    ("Google Chrome", Category::Browser),
    ("Chromium", Category::Browser),
    ("Firefox", Category::Browser),
    ("Microsoft Edge", Category::Browser),
    ("Brave", Category::Browser),
    ("Opera", Category::Browser),
    ("Safari", Category::Browser),
    ("Visual Studio Code", Category::Development),
    ("Visual Studio", Category::Development),
    ("IntelliJ IDEA", Category::Development),
    ("PyCharm", Category::Development),
    ("Neovim", Category::Development),
    ("Vim", Category::Development),
    ("Terminal", Category::Development),
    ("Windows Terminal", Category::Development),
    ("Alacritty", Category::Development),
    ("Kitty", Category::Development),
    ("Slack", Category::Communication),
    ("Microsoft Teams", Category::Communication),
    ("Discord", Category::Communication),
    ("Zoom", Category::Communication),
    ("Telegram", Category::Communication),
    ("Microsoft Outlook", Category::Communication),
    ("Microsoft Word", Category::Productivity),
    ("Microsoft Excel", Category::Productivity),
    ("Microsoft PowerPoint", Category::Productivity),
    ("Notion", Category::Productivity),
    ("Obsidian", Category::Productivity),
    ("LibreOffice", Category::Productivity),
    ("Spotify", Category::Entertainment),
    ("VLC", Category::Entertainment),
    ("Figma", Category::Design),
    ("Adobe Photoshop", Category::Design),
    ("Adobe Illustrator", Category::Design),
    ("GIMP", Category::Design),
];

const ENTERTAINMENT_TITLE_KEYWORDS: &[&str] = &[
    "youtube",
    "netflix",
    "twitch",
    "instagram",
    "facebook",
    "twitter",
    "tiktok",
    "reddit",
];

const DEVELOPMENT_TITLE_KEYWORDS: &[&str] = &[
    "github",
    "gitlab",
    "stackoverflow",
    "stack overflow",
    "localhost",
    "docs.",
    "documentation",
];

/// Table driven resolver. Browsers are refined through the window title, since a browser can
/// host anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticCategoryResolver;

impl CategoryResolver for StaticCategoryResolver {
    fn categorize(&self, app_name: &str, window_title: &str) -> Category {
        let category = APPLICATION_CATEGORIES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(app_name))
            .map(|(_, category)| *category)
            .unwrap_or(Category::Other);

        if category != Category::Browser {
            return category;
        }

        let title = window_title.to_lowercase();
        if DEVELOPMENT_TITLE_KEYWORDS.iter().any(|k| title.contains(k)) {
            Category::Development
        } else if ENTERTAINMENT_TITLE_KEYWORDS.iter().any(|k| title.contains(k)) {
            Category::Entertainment
        } else {
            Category::Browser
        }
    }
}

/// Converts a raw platform identifier (`C:\Program Files\Google\Chrome\chrome.exe`,
/// `/usr/bin/nvim`, `Google Chrome`) into a display name. Two identifiers that normalize to the
/// same name are considered the same application.
pub fn normalize_app_name(raw: &str) -> String {
    let file_name = raw
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let stem = match file_name.len().checked_sub(4) {
        Some(split)
            if file_name.is_char_boundary(split)
                && file_name[split..].eq_ignore_ascii_case(".exe") =>
        {
            &file_name[..split]
        }
        _ => file_name,
    };

    if stem.is_empty() {
        return UNKNOWN_APPLICATION.into();
    }

    let lowercase = stem.to_lowercase();
    if let Some((_, display)) = KNOWN_APPLICATIONS
        .iter()
        .find(|(executable, _)| *executable == lowercase)
    {
        return (*display).into();
    }

    let words = stem
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>();

    if words.is_empty() {
        UNKNOWN_APPLICATION.into()
    } else {
        words.join(" ")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Drops control characters, bounds the title to `max_len` characters and trims it.
pub fn sanitize_window_title(title: &str, max_len: usize) -> String {
    let cleaned = title.chars().filter(|c| !c.is_control()).collect::<String>();

    let bounded = if cleaned.chars().count() > max_len {
        let mut truncated = cleaned.chars().take(max_len).collect::<String>();
        truncated.push_str("...");
        truncated
    } else {
        cleaned
    };

    bounded.trim().to_string()
}
