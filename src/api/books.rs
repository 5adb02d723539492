use crate::error::Result;
use crate::http_client::{ApiRequest, BookshelfHttpClient};
use crate::models::{Book, BookSearchResponse, PagedReadBooks, ReadBook};

const BOOKS_PATH: &str = "/api/books";

/// Catalog and reading list API
pub struct BooksApi<'a> {
    client: &'a BookshelfHttpClient,
}

impl<'a> BooksApi<'a> {
    pub(crate) fn new(client: &'a BookshelfHttpClient) -> Self {
        Self { client }
    }

    /// Search the external catalog
    pub async fn search(&self, query: &str, page: u32, size: u32) -> Result<BookSearchResponse> {
        let request = ApiRequest::get(format!("{}/search", BOOKS_PATH))
            .query("q", query)
            .query("page", page)
            .query("size", size);
        self.client.send_json(request).await
    }

    /// Catalog details for one book
    pub async fn get(&self, id: &str) -> Result<Book> {
        self.client
            .send_json(ApiRequest::get(BOOKS_PATH).segment(id))
            .await
    }

    /// Add a book to the caller's reading list
    pub async fn add(&self, book: &Book) -> Result<()> {
        self.client
            .send_empty(ApiRequest::post(BOOKS_PATH).json(book)?)
            .await
    }

    /// Whether the caller has read the book with this catalog id
    pub async fn has_read(&self, external_id: &str) -> Result<bool> {
        let request = ApiRequest::get(format!("{}/books/read", BOOKS_PATH)).segment(external_id);
        self.client.send_json(request).await
    }

    /// One page of the caller's reading list
    pub async fn read_page(&self, page: u32, size: u32) -> Result<PagedReadBooks> {
        let request = ApiRequest::get(format!("{}/paged", BOOKS_PATH))
            .query("page", page)
            .query("size", size);
        self.client.send_json(request).await
    }

    /// The caller's whole reading list
    pub async fn read_all(&self) -> Result<Vec<ReadBook>> {
        self.client.send_json(ApiRequest::get(BOOKS_PATH)).await
    }

    /// Remove an entry from the reading list by its row id
    pub async fn remove(&self, id: i64) -> Result<()> {
        self.client
            .send_empty(ApiRequest::delete(BOOKS_PATH).segment(id.to_string()))
            .await
    }
}
