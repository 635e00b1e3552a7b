//! Resolve command.

use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;

use crate::resolver::{FormatDecision, FormatPreferences, Resolver, apply_placeholders};
use crate::settings::EngineSettings;

pub struct ResolveArgs<'a> {
    pub template: &'a str,
    pub root: &'a Path,
    pub ext: Option<&'a str>,
    pub format: Option<&'a str>,
    pub placeholders: &'a [(String, String)],
}

/// Resolve a template against a root without touching any file.
pub fn decide(args: &ResolveArgs<'_>, settings: &EngineSettings) -> Result<FormatDecision> {
    let mut settings = settings.clone();
    if let Some(format) = args.format {
        settings.format = Some(format.to_string());
    }
    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("config root {} not found", args.root.display()))?;

    let prefs = FormatPreferences::from_settings(&settings).with_explicit_default(args.ext);
    let placeholders: IndexMap<String, String> = args.placeholders.iter().cloned().collect();
    let template = apply_placeholders(args.template, &placeholders);

    Ok(Resolver::new(root, prefs).resolve(&template)?)
}

pub fn run(args: &ResolveArgs<'_>, settings: &EngineSettings) -> Result<()> {
    let decision = decide(args, settings)?;

    println!("target:  {}", decision.target.display());
    println!("format:  {}", decision.target_format);
    if let (Some(source), Some(format)) = (&decision.source, decision.source_format) {
        println!("migrate: {} ({format})", source.display());
    }
    for note in &decision.notes {
        println!("note:    {note}");
    }
    Ok(())
}
