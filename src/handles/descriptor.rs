use std::marker::PhantomData;

use odbc_sys::{CDataType, Desc, HDesc, HStmt, Handle, HandleType, Pointer, IS_POINTER, IS_SMALLINT};

use super::{as_handle::AsHandle, sql_result::ExtSqlReturn};
use crate::error::Error;

#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
use odbc_sys::SQLSetDescField as sql_set_desc_field;

#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
use odbc_sys::SQLSetDescFieldW as sql_set_desc_field;

/// A descriptor implicitly allocated with, and borrowed from, a statement. Used to manipulate
/// fields the ordinary bind calls cannot carry, most notably precision and scale of exact
/// numeric buffers.
///
/// * APD application parameter descriptor
/// * ARD application row descriptor
pub struct Descriptor<'stmt> {
    handle: HDesc,
    parent: PhantomData<&'stmt HStmt>,
}

impl Descriptor<'_> {
    /// # Safety
    ///
    /// Call this method only with a valid (successfully allocated) ODBC descriptor handle.
    pub unsafe fn new(handle: HDesc) -> Self {
        Self {
            handle,
            parent: PhantomData,
        }
    }

    /// Directly access the underlying ODBC handle.
    pub fn as_sys(&self) -> HDesc {
        self.handle
    }

    /// C-Type of the buffer bound to the record.
    ///
    /// Note that setting the type clears the precision and scale fields of the record. Set the
    /// type first.
    ///
    /// # Safety
    ///
    /// The buffer bound to the data pointer must match, otherwise fetches may write beyond its
    /// bounds.
    pub unsafe fn set_type(&mut self, rec_number: i16, c_type: CDataType) -> Result<(), Error> {
        sql_set_desc_field(
            self.handle,
            rec_number,
            Desc::Type,
            c_type as i16 as Pointer,
            IS_SMALLINT,
        )
        .into_sql_result("SQLSetDescField")
        .into_result(self)
    }

    /// Number of digits for an exact numeric type.
    pub fn set_precision(&mut self, rec_number: i16, precision: i16) -> Result<(), Error> {
        unsafe {
            sql_set_desc_field(
                self.handle,
                rec_number,
                Desc::Precision,
                precision as Pointer,
                IS_SMALLINT,
            )
        }
        .into_sql_result("SQLSetDescField")
        .into_result(self)
    }

    /// The defined scale for decimal and numeric data types.
    pub fn set_scale(&mut self, rec_number: i16, scale: i16) -> Result<(), Error> {
        unsafe {
            sql_set_desc_field(
                self.handle,
                rec_number,
                Desc::Scale,
                scale as Pointer,
                IS_SMALLINT,
            )
        }
        .into_sql_result("SQLSetDescField")
        .into_result(self)
    }

    /// Data pointer filled with values from the source when fetching, or read when executing.
    /// Setting the data pointer is what validates the record, so it must be set last.
    ///
    /// # Safety
    ///
    /// Pointer must be valid and match the description set using `set_type`, `set_precision` and
    /// `set_scale`. `NULL` unbinds the record.
    pub unsafe fn set_data_ptr(&mut self, rec_number: i16, data_ptr: Pointer) -> Result<(), Error> {
        sql_set_desc_field(self.handle, rec_number, Desc::DataPtr, data_ptr, IS_POINTER)
            .into_sql_result("SQLSetDescField")
            .into_result(self)
    }

    /// Pointer to the length indicator of the record.
    ///
    /// # Safety
    ///
    /// Pointer must be valid for as long as the binding is in place.
    pub unsafe fn set_indicator_ptr(
        &mut self,
        rec_number: i16,
        indicator_ptr: *mut isize,
    ) -> Result<(), Error> {
        sql_set_desc_field(
            self.handle,
            rec_number,
            Desc::IndicatorPtr,
            indicator_ptr as Pointer,
            IS_POINTER,
        )
        .into_sql_result("SQLSetDescField")
        .into_result(self)
    }

    /// Pointer to the cell the driver writes the total octet length of the value into. Usually
    /// aliased with the indicator pointer.
    ///
    /// # Safety
    ///
    /// Pointer must be valid for as long as the binding is in place.
    pub unsafe fn set_octet_length_ptr(
        &mut self,
        rec_number: i16,
        length_ptr: *mut isize,
    ) -> Result<(), Error> {
        sql_set_desc_field(
            self.handle,
            rec_number,
            Desc::OctetLengthPtr,
            length_ptr as Pointer,
            IS_POINTER,
        )
        .into_sql_result("SQLSetDescField")
        .into_result(self)
    }
}

unsafe impl AsHandle for Descriptor<'_> {
    fn as_handle(&self) -> Handle {
        self.handle.as_handle()
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Desc
    }
}
