// Typed access to the bookshelf endpoints

mod auth;
mod books;

pub use auth::{validate_credentials, AuthApi, MIN_PASSWORD_LENGTH};
pub use books::BooksApi;

use crate::http_client::BookshelfHttpClient;

impl BookshelfHttpClient {
    /// Access the authentication endpoints
    pub fn auth(&self) -> AuthApi<'_> {
        AuthApi::new(self)
    }

    /// Access the catalog and reading list endpoints
    pub fn books(&self) -> BooksApi<'_> {
        BooksApi::new(self)
    }
}
