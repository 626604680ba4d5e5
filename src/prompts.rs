//! Instruction text sent alongside the sheet image.
//!
//! Centralising the prompt here keeps the recognition client free of prompt
//! wording and lets tests inspect the exact text without a network call.

/// Build the extraction instruction for a sheet with `columns` date columns.
///
/// `columns` appears twice: once describing the shape of each record and
/// once as a hard constraint on the `attendance` length. Models drop or
/// invent columns far less often when the count is repeated as a rule.
pub fn attendance_prompt(columns: usize) -> String {
    format!(
        "Analyze this attendance sheet image. \
         It contains student details and attendance marks for exactly {columns} dates/columns. \
         Return a JSON object with a key 'records' containing a list of students. \
         Each item in the list must have these fields: \
         's_no' (string), 'roll_no' (string), 'name' (string), \
         and 'attendance' (a list of exactly {columns} strings, either 'Present' or 'Absent'). \
         Rules: \
         1. Mark 'Absent' if the cell is empty, has a cross (X), or a cut. \
         2. Mark 'Present' if there is a signature, text, or scribble. \
         3. Ensure the 'attendance' list has exactly {columns} entries."
    )
}
