//! Skills — markdown playbooks that teach the agent how to combine its
//! tools for a domain. They never register new tools.
//!
//! Each skill lives at `workspace/skills/<name>/SKILL.md` with optional
//! YAML-ish frontmatter. Skills marked `always: true` are injected in full
//! into every system prompt; the rest appear in a summary the LM can load
//! on demand with `read_file`.

use std::path::{Path, PathBuf};

/// A discovered skill.
#[derive(Clone, Debug)]
pub struct SkillInfo {
    pub name: String,
    pub path: PathBuf,
    pub description: Option<String>,
    pub always: bool,
}

/// Discovers and loads skill files under the workspace.
pub struct SkillsLoader {
    skills_dir: PathBuf,
}

impl SkillsLoader {
    pub fn new(workspace: &Path) -> Self {
        Self {
            skills_dir: workspace.join("skills"),
        }
    }

    /// All skills found on disk, sorted by name.
    pub fn list_skills(&self) -> Vec<SkillInfo> {
        let mut skills = Vec::new();

        let Ok(entries) = std::fs::read_dir(&self.skills_dir) else {
            return skills;
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let path = dir.join("SKILL.md");
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            let (description, always) = parse_frontmatter(&content);

            skills.push(SkillInfo {
                name,
                path,
                description,
                always,
            });
        }

        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    /// Full bodies of always-on skills for prompt injection.
    pub fn always_on_section(&self) -> Option<String> {
        let parts: Vec<String> = self
            .list_skills()
            .into_iter()
            .filter(|s| s.always)
            .filter_map(|s| {
                let content = std::fs::read_to_string(&s.path).ok()?;
                let body = strip_frontmatter(&content).trim().to_string();
                if body.is_empty() {
                    None
                } else {
                    Some(format!("### Skill: {}\n\n{body}", s.name))
                }
            })
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(format!("# Active Skills\n\n{}", parts.join("\n\n---\n\n")))
        }
    }

    /// Catalogue of on-demand skills for the system prompt.
    pub fn summary_section(&self) -> Option<String> {
        let on_demand: Vec<SkillInfo> = self
            .list_skills()
            .into_iter()
            .filter(|s| !s.always)
            .collect();
        if on_demand.is_empty() {
            return None;
        }

        let mut lines = vec![
            "# Skills".to_string(),
            "The following skills extend your capabilities. To use one, \
             read its SKILL.md file with the `read_file` tool."
                .to_string(),
            String::new(),
        ];
        for skill in on_demand {
            let desc = skill.description.unwrap_or_default();
            lines.push(format!(
                "- {} — {} ({})",
                skill.name,
                desc,
                skill.path.display()
            ));
        }
        Some(lines.join("\n"))
    }
}

/// Pull `description:` and `always:` out of a frontmatter block.
fn parse_frontmatter(content: &str) -> (Option<String>, bool) {
    let Some(block) = frontmatter_block(content) else {
        return (None, false);
    };

    let mut description = None;
    let mut always = false;
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("description:") {
            description = Some(value.trim().trim_matches('"').to_string());
        }
        if let Some(value) = line.strip_prefix("always:") {
            always = value.trim() == "true";
        }
    }
    (description, always)
}

fn frontmatter_block(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    Some(&rest[..end])
}

/// Skill body without its frontmatter.
fn strip_frontmatter(content: &str) -> &str {
    if let Some(rest) = content.strip_prefix("---") {
        if let Some(end) = rest.find("\n---") {
            let after = &rest[end + 4..];
            return after.trim_start_matches('-').trim_start_matches('\n');
        }
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(workspace: &Path, name: &str, content: &str) {
        let dir = workspace.join("skills").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), content).unwrap();
    }

    #[test]
    fn test_no_skills_dir() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SkillsLoader::new(dir.path());
        assert!(loader.list_skills().is_empty());
        assert!(loader.always_on_section().is_none());
        assert!(loader.summary_section().is_none());
    }

    #[test]
    fn test_discovery_and_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "github",
            "---\ndescription: \"Use the gh CLI\"\nalways: false\n---\n\n# GitHub\nRun gh commands.",
        );
        write_skill(
            dir.path(),
            "base",
            "---\ndescription: \"House rules\"\nalways: true\n---\n\n# Base\nBe brief.",
        );

        let loader = SkillsLoader::new(dir.path());
        let skills = loader.list_skills();
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name, "base");
        assert!(skills[0].always);
        assert_eq!(skills[1].description.as_deref(), Some("Use the gh CLI"));
    }

    #[test]
    fn test_always_on_bodies_injected() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "base",
            "---\nalways: true\n---\n\n# Base\nBe brief.",
        );

        let loader = SkillsLoader::new(dir.path());
        let section = loader.always_on_section().unwrap();
        assert!(section.contains("# Active Skills"));
        assert!(section.contains("### Skill: base"));
        assert!(section.contains("Be brief."));
        assert!(!section.contains("always: true"));
    }

    #[test]
    fn test_summary_lists_on_demand_only() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "github",
            "---\ndescription: \"gh CLI\"\n---\n\nBody",
        );
        write_skill(dir.path(), "base", "---\nalways: true\n---\n\nBody");

        let loader = SkillsLoader::new(dir.path());
        let summary = loader.summary_section().unwrap();
        assert!(summary.contains("github"));
        assert!(summary.contains("gh CLI"));
        assert!(!summary.contains("- base"));
    }

    #[test]
    fn test_strip_frontmatter_without_block() {
        assert_eq!(strip_frontmatter("plain body"), "plain body");
    }
}
