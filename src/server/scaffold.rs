//! Initial files of a new server directory.

use crate::error::Result;
use crate::files::FileManager;
use crate::server::ServerDefinition;
use chrono::Utc;

/// Name of the start script for the current platform
pub fn start_script_name() -> &'static str {
    if cfg!(windows) { "start.bat" } else { "start.sh" }
}

/// Jar name the start script expects for this definition
pub fn expected_jar_name(definition: &ServerDefinition) -> String {
    format!(
        "{}-{}.jar",
        definition.server_type.to_lowercase(),
        definition.version
    )
}

pub fn render_eula() -> String {
    format!(
        "#By changing the setting below to TRUE you are indicating your agreement to our EULA (https://aka.ms/MinecraftEULA).\n#{}\neula=true\n",
        Utc::now().to_rfc3339()
    )
}

pub fn render_server_properties(definition: &ServerDefinition) -> String {
    let lines = [
        "#Minecraft server properties".to_string(),
        format!("#{}", Utc::now().to_rfc3339()),
        format!("server-port={}", definition.port),
        "gamemode=survival".to_string(),
        "difficulty=easy".to_string(),
        "spawn-protection=16".to_string(),
        "max-players=20".to_string(),
        "online-mode=true".to_string(),
        "white-list=false".to_string(),
        "spawn-monsters=true".to_string(),
        "spawn-animals=true".to_string(),
        "spawn-npcs=true".to_string(),
        "pvp=true".to_string(),
        "enable-command-block=false".to_string(),
        format!("motd=\u{a7}aWelcome to {}!", definition.name),
        format!("server-name={}", definition.name),
        "max-world-size=29999984".to_string(),
        "view-distance=10".to_string(),
        "simulation-distance=10".to_string(),
        "level-name=world".to_string(),
        "level-type=minecraft\\:normal".to_string(),
        "level-seed=".to_string(),
        "allow-cheats=false".to_string(),
        "enforce-secure-profile=true".to_string(),
    ];
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn render_start_script(definition: &ServerDefinition, java: &str) -> String {
    let jar = expected_jar_name(definition);
    let command = format!(
        "\"{}\" -Xmx{}M -Xms{}M {} -jar \"{}\" nogui",
        java,
        definition.ram_megabytes,
        definition.ram_megabytes / 2,
        definition.java_args,
        jar
    );

    if cfg!(windows) {
        format!(
            "@echo off\r\necho Starting {}...\r\n{}\r\npause\r\n",
            definition.name, command
        )
    } else {
        format!(
            "#!/bin/sh\necho \"Starting {}...\"\n{}\n",
            definition.name, command
        )
    }
}

/// Writes EULA, properties, start script and the plugins directory.
#[tracing::instrument(skip(files, definition), fields(server_id = %definition.id))]
pub async fn write_scaffold(
    files: &dyn FileManager,
    definition: &ServerDefinition,
    java: &str,
) -> Result<()> {
    let dir = &definition.directory_path;

    files.write_file(&dir.join("eula.txt"), &render_eula()).await?;
    files
        .write_file(
            &dir.join("server.properties"),
            &render_server_properties(definition),
        )
        .await?;

    let script = dir.join(start_script_name());
    files
        .write_file(&script, &render_start_script(definition, java))
        .await?;
    files.set_executable(&script).await?;

    files.create_directory(&dir.join("plugins")).await?;

    tracing::debug!("Wrote server scaffold");
    Ok(())
}
