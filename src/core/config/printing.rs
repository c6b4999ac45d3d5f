use crate::core::config::data::{path_display, LoadedConfig};

impl LoadedConfig {
    pub fn print_all(&self) {
        let settings = &self.settings;
        let options = &settings.options;

        println!("Current configuration:");
        println!("  config-dir: {}", path_display(self.paths.root()));
        println!("  server: {}", settings.base_url());
        println!("  ui-port: {}", settings.ui_port);
        println!("  model: {}", settings.model_name);
        println!("  temperature: {}", options.temperature);
        println!("  context-size: {}", options.context_size);
        println!("  top-k: {}", options.top_k);
        println!("  top-p: {}", options.top_p);
        println!("  repeat-penalty: {}", options.repeat_penalty);
        if options.uses_random_seed() {
            println!("  seed: random");
        } else {
            println!("  seed: {}", options.seed);
        }
        println!(
            "  system-prompt: {} ({} chars)",
            path_display(self.paths.system_prompt_path()),
            self.prompts.system_prompt.chars().count()
        );
        println!(
            "  greeting: {} ({} chars)",
            path_display(self.paths.greeting_path()),
            self.prompts.greeting.chars().count()
        );
        println!("  history-dir: {}", path_display(self.paths.history_dir()));
    }
}
