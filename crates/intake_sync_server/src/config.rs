//! Server configuration.

/// Configuration for the reference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Longest accepted candidate name, in characters.
    pub max_name_len: usize,
    /// Most categories a candidate may carry.
    pub max_categories: usize,
    /// Default page size for listing.
    pub default_page_size: usize,
    /// Largest page a list request may ask for.
    pub max_page_size: usize,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_name_len: 200,
            max_categories: 32,
            default_page_size: 100,
            max_page_size: 1000,
        }
    }

    /// Sets the maximum name length.
    pub fn with_max_name_len(mut self, len: usize) -> Self {
        self.max_name_len = len;
        self
    }

    /// Sets the maximum number of categories.
    pub fn with_max_categories(mut self, max: usize) -> Self {
        self.max_categories = max;
        self
    }

    /// Sets the default page size.
    pub fn with_default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    /// Sets the maximum page size.
    pub fn with_max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
